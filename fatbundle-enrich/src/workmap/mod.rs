//! WorkMap: a boolean mirror of a fat bundle
//!
//! `true` at a leaf means "compute or fetch this", `false` means "leave it".
//! Objects mirror as `Node`, arrays as `List` (ordinary arrays) and staged
//! sense collections as `Senses`. A WorkMap is a pure value: it never holds
//! data from the record and never changes after it is produced.

pub mod generator;

pub use generator::WorkMapGenerator;

use crate::error::EnrichError;
use crate::predicates::{LeafPath, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-leaf work flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMap {
    /// Scalar leaf
    Flag(bool),
    /// Object node, same keys as the record object
    Node(BTreeMap<String, WorkMap>),
    /// Array node; `pending` asks for the collection itself to be produced
    List { pending: bool, items: Vec<WorkMap> },
    /// Staged sense collection
    Senses(SenseGate),
}

/// Flag shape of one token's sense collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenseGate {
    /// Nothing fetched yet: run the dictionary lookup
    Pending,
    /// One sub-map per existing entry; flagged entries go to normalization
    Populated(Vec<WorkMap>),
}

impl SenseGate {
    pub fn needs_work(&self) -> bool {
        match self {
            SenseGate::Pending => true,
            SenseGate::Populated(entries) => entries.iter().any(WorkMap::needs_work),
        }
    }

    /// Per-entry "needs normalization" flags (empty for `Pending`)
    pub fn entry_flags(&self) -> Vec<bool> {
        match self {
            SenseGate::Pending => Vec::new(),
            SenseGate::Populated(entries) => entries.iter().map(WorkMap::needs_work).collect(),
        }
    }
}

impl WorkMap {
    /// True if any flag in this subtree is set
    pub fn needs_work(&self) -> bool {
        match self {
            WorkMap::Flag(flag) => *flag,
            WorkMap::Node(children) => children.values().any(WorkMap::needs_work),
            WorkMap::List { pending, items } => *pending || items.iter().any(WorkMap::needs_work),
            WorkMap::Senses(gate) => gate.needs_work(),
        }
    }

    /// True when nothing anywhere is flagged
    pub fn is_satisfied(&self) -> bool {
        !self.needs_work()
    }

    /// Child of a `Node`
    pub fn child(&self, key: &str) -> Option<&WorkMap> {
        match self {
            WorkMap::Node(children) => children.get(key),
            _ => None,
        }
    }

    /// Item of a `List` or populated `Senses`
    pub fn item(&self, index: usize) -> Option<&WorkMap> {
        match self {
            WorkMap::List { items, .. } => items.get(index),
            WorkMap::Senses(SenseGate::Populated(entries)) => entries.get(index),
            _ => None,
        }
    }

    pub fn at(&self, path: &LeafPath) -> Option<&WorkMap> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| match segment {
                PathSegment::Key(key) => node.child(key),
                PathSegment::Index(index) => node.item(*index),
            })
    }

    /// Flag at `path`; absent nodes are not flagged
    ///
    /// For a `List` this is its own `pending` flag, not its items.
    pub fn flag_at(&self, path: &LeafPath) -> bool {
        match self.at(path) {
            Some(WorkMap::Flag(flag)) => *flag,
            Some(WorkMap::List { pending, .. }) => *pending,
            Some(other) => other.needs_work(),
            None => false,
        }
    }

    pub fn sense_gate_at(&self, path: &LeafPath) -> Option<&SenseGate> {
        match self.at(path) {
            Some(WorkMap::Senses(gate)) => Some(gate),
            _ => None,
        }
    }

    /// Display paths of every set flag, in document order
    pub fn pending_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_pending(&mut LeafPath::root(), &mut out);
        out
    }

    fn collect_pending(&self, path: &mut LeafPath, out: &mut Vec<String>) {
        match self {
            WorkMap::Flag(true) => out.push(path.to_string()),
            WorkMap::Flag(false) => {}
            WorkMap::Node(children) => {
                for (key, child) in children {
                    path.push_key(key);
                    child.collect_pending(path, out);
                    path.pop();
                }
            }
            WorkMap::List { pending, items } => {
                if *pending {
                    out.push(path.to_string());
                }
                for (index, item) in items.iter().enumerate() {
                    path.push_index(index);
                    item.collect_pending(path, out);
                    path.pop();
                }
            }
            WorkMap::Senses(SenseGate::Pending) => out.push(path.to_string()),
            WorkMap::Senses(SenseGate::Populated(entries)) => {
                for (index, entry) in entries.iter().enumerate() {
                    path.push_index(index);
                    entry.collect_pending(path, out);
                    path.pop();
                }
            }
        }
    }

    /// Check that this map can drive `record`
    ///
    /// Object keys must match exactly. A list with items must have the
    /// record array's length; an item-less list (or a pending sense gate)
    /// also accepts a collection the record has since grown.
    pub fn conforms_to(&self, record: &Value) -> Result<(), EnrichError> {
        self.conform(record, &mut LeafPath::root())
    }

    fn conform(&self, record: &Value, path: &mut LeafPath) -> Result<(), EnrichError> {
        match (self, record) {
            (WorkMap::Flag(_), Value::Object(_) | Value::Array(_)) => {
                Err(mismatch(path, "scalar", record))
            }
            (WorkMap::Flag(_), _) => Ok(()),

            (WorkMap::Node(children), Value::Object(fields)) => {
                if let Some(key) = fields.keys().find(|k| !children.contains_key(*k)) {
                    return Err(EnrichError::ShapeMismatch {
                        path: path.key(key).to_string(),
                        expected: "no field".to_string(),
                        found: "field in record".to_string(),
                    });
                }
                for (key, child) in children {
                    path.push_key(key);
                    let result = match fields.get(key) {
                        Some(value) => child.conform(value, path),
                        None => Err(EnrichError::ShapeMismatch {
                            path: path.to_string(),
                            expected: "field in record".to_string(),
                            found: "no field".to_string(),
                        }),
                    };
                    path.pop();
                    result?;
                }
                Ok(())
            }

            (WorkMap::List { items, .. }, Value::Array(values)) => {
                if items.is_empty() {
                    return Ok(());
                }
                if items.len() != values.len() {
                    return Err(EnrichError::ShapeMismatch {
                        path: path.to_string(),
                        expected: format!("array of {}", items.len()),
                        found: format!("array of {}", values.len()),
                    });
                }
                conform_items(items, values, path)
            }

            (WorkMap::Senses(SenseGate::Pending), Value::Array(_) | Value::Null) => Ok(()),
            (WorkMap::Senses(SenseGate::Populated(entries)), Value::Array(values)) => {
                if entries.len() != values.len() {
                    return Err(EnrichError::ShapeMismatch {
                        path: path.to_string(),
                        expected: format!("{} sense entries", entries.len()),
                        found: format!("{} sense entries", values.len()),
                    });
                }
                conform_items(entries, values, path)
            }

            (WorkMap::Node(_), _) => Err(mismatch(path, "object", record)),
            (WorkMap::List { .. }, _) => Err(mismatch(path, "array", record)),
            (WorkMap::Senses(_), _) => Err(mismatch(path, "sense array", record)),
        }
    }
}

fn conform_items(
    items: &[WorkMap],
    values: &[Value],
    path: &mut LeafPath,
) -> Result<(), EnrichError> {
    for (index, (item, value)) in items.iter().zip(values).enumerate() {
        path.push_index(index);
        let result = item.conform(value, path);
        path.pop();
        result?;
    }
    Ok(())
}

fn mismatch(path: &LeafPath, expected: &str, found: &Value) -> EnrichError {
    EnrichError::ShapeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: value_kind(found).to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
