//! WorkMap generation
//!
//! `generate` walks a record and flags every leaf whose predicate fails.
//! `blank` produces the same shape with nothing flagged, for handing a
//! freshly persisted record to the next cycle.
//!
//! Sense collections use staged gating, first match wins:
//! 1. empty (or absent) → `Senses(Pending)`
//! 2. some entry not normalized → `Populated`, that entry's sub-map all true
//! 3. otherwise → `Populated`, all false

use super::{SenseGate, WorkMap};
use crate::error::EnrichError;
use crate::predicates::{LeafPath, Predicate, PredicateRegistry};
use fatbundle_common::FatBundle;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Evaluate,
    Blank,
}

/// Builds WorkMaps from records using a predicate registry
#[derive(Debug, Clone)]
pub struct WorkMapGenerator {
    registry: Arc<PredicateRegistry>,
}

impl WorkMapGenerator {
    pub fn new(registry: Arc<PredicateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PredicateRegistry {
        &self.registry
    }

    /// Flag every leaf of `bundle` that fails its predicate
    pub fn generate(&self, bundle: &FatBundle) -> Result<WorkMap, EnrichError> {
        Ok(self.generate_value(&serde_json::to_value(bundle)?))
    }

    /// Same shape as `generate`, every flag false
    pub fn blank(&self, bundle: &FatBundle) -> Result<WorkMap, EnrichError> {
        Ok(self.blank_value(&serde_json::to_value(bundle)?))
    }

    pub fn generate_value(&self, record: &Value) -> WorkMap {
        self.mirror(record, &mut LeafPath::root(), Mode::Evaluate)
    }

    pub fn blank_value(&self, record: &Value) -> WorkMap {
        self.mirror(record, &mut LeafPath::root(), Mode::Blank)
    }

    fn mirror(&self, value: &Value, path: &mut LeafPath, mode: Mode) -> WorkMap {
        let pattern = path.pattern();
        if self.registry.is_sense_collection(&pattern) {
            return self.sense_gate(value, &pattern, mode);
        }

        match value {
            Value::Object(fields) => WorkMap::Node(
                fields
                    .iter()
                    .map(|(key, child)| {
                        path.push_key(key);
                        let flags = self.mirror(child, path, mode);
                        path.pop();
                        (key.clone(), flags)
                    })
                    .collect(),
            ),
            Value::Array(items) => WorkMap::List {
                pending: mode == Mode::Evaluate
                    && self.registry.evaluate(&pattern, value).needs_work(),
                items: items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        path.push_index(index);
                        let flags = self.mirror(item, path, mode);
                        path.pop();
                        flags
                    })
                    .collect(),
            },
            scalar => WorkMap::Flag(
                mode == Mode::Evaluate && self.registry.evaluate(&pattern, scalar).needs_work(),
            ),
        }
    }

    fn sense_gate(&self, value: &Value, pattern: &str, mode: Mode) -> WorkMap {
        let entries = value.as_array().map(Vec::as_slice).unwrap_or_default();
        let staged = mode == Mode::Evaluate && self.registry.resolve(pattern) != Predicate::Exempt;

        if staged && entries.is_empty() {
            return WorkMap::Senses(SenseGate::Pending);
        }

        let marker = format!("{}[].normalized", pattern);
        let flagged: Vec<WorkMap> = entries
            .iter()
            .map(|entry| {
                let dirty = staged
                    && self
                        .registry
                        .evaluate(&marker, entry.get("normalized").unwrap_or(&Value::Null))
                        .needs_work();
                uniform(entry, dirty)
            })
            .collect();

        WorkMap::Senses(SenseGate::Populated(flagged))
    }
}

impl Default for WorkMapGenerator {
    fn default() -> Self {
        Self::new(Arc::new(PredicateRegistry::standard()))
    }
}

/// Mirror `value` with every flag set to `flag`
fn uniform(value: &Value, flag: bool) -> WorkMap {
    match value {
        Value::Object(fields) => WorkMap::Node(
            fields
                .iter()
                .map(|(key, child)| (key.clone(), uniform(child, flag)))
                .collect(),
        ),
        Value::Array(items) => WorkMap::List {
            pending: flag,
            items: items.iter().map(|item| uniform(item, flag)).collect(),
        },
        _ => WorkMap::Flag(flag),
    }
}
