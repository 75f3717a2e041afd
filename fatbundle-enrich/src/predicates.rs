//! Completeness predicates
//!
//! Each leaf of a fat bundle is judged by a predicate looked up through its
//! normalized path (`tokens.th.display[].romanization`). Array indices are
//! erased so one rule covers every position. Unregistered paths fall back to
//! plain presence.
//!
//! Predicates are tri-state: a leaf is `Missing` (absent or null), `Dirty`
//! (present but fails its rule) or `Clean`. Both `Missing` and `Dirty` need
//! work.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Outcome of evaluating one leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Missing,
    Dirty,
    Clean,
}

impl Completeness {
    pub fn needs_work(self) -> bool {
        !matches!(self, Completeness::Clean)
    }
}

/// Rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Any non-null value
    Present,
    /// Non-blank string
    PresentNonBlank,
    /// Array with at least one element
    NonEmptyCollection,
    /// Boolean equal to the given value
    ExactBool(bool),
    /// Sense list: empty is missing, any unnormalized entry is dirty
    SenseCollection,
    /// Never needs work
    Exempt,
}

impl Predicate {
    pub fn evaluate(self, value: &Value) -> Completeness {
        if self == Predicate::Exempt {
            return Completeness::Clean;
        }
        if value.is_null() {
            return Completeness::Missing;
        }

        match self {
            Predicate::Present | Predicate::Exempt => Completeness::Clean,
            Predicate::PresentNonBlank => match value.as_str() {
                Some(s) if !s.trim().is_empty() => Completeness::Clean,
                _ => Completeness::Dirty,
            },
            Predicate::NonEmptyCollection => match value.as_array() {
                Some(items) if !items.is_empty() => Completeness::Clean,
                _ => Completeness::Dirty,
            },
            Predicate::ExactBool(expected) => match value.as_bool() {
                Some(b) if b == expected => Completeness::Clean,
                _ => Completeness::Dirty,
            },
            Predicate::SenseCollection => match value.as_array() {
                Some(entries) if entries.is_empty() => Completeness::Missing,
                Some(entries) if entries.iter().all(entry_normalized) => Completeness::Clean,
                _ => Completeness::Dirty,
            },
        }
    }
}

/// Whether one raw sense entry value carries the normalized marker
pub fn entry_normalized(entry: &Value) -> bool {
    entry.get("normalized").and_then(Value::as_bool) == Some(true)
}

/// Evaluate a typed leaf
///
/// A leaf that cannot be serialized counts as missing.
pub fn evaluate_leaf<T: serde::Serialize + ?Sized>(
    predicate: Predicate,
    leaf: &T,
) -> Completeness {
    let value = serde_json::to_value(leaf).unwrap_or(Value::Null);
    predicate.evaluate(&value)
}

// ============================================================================
// Paths
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a node inside a bundle document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafPath {
    segments: Vec<PathSegment>,
}

impl LeafPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path with optional indices (`tokens.th.display[2].text`)
    pub fn parse(path: &str) -> Self {
        let mut out = Self::root();
        for part in path.split('.').filter(|p| !p.is_empty()) {
            let mut rest = part;
            if let Some(open) = rest.find('[') {
                out.push_key(&rest[..open]);
                rest = &rest[open..];
                while let Some(close) = rest.find(']') {
                    if let Ok(index) = rest[1..close].parse::<usize>() {
                        out.push_index(index);
                    }
                    rest = &rest[close + 1..];
                }
            } else {
                out.push_key(rest);
            }
        }
        out
    }

    pub fn push_key(&mut self, key: &str) {
        self.segments.push(PathSegment::Key(key.to_string()));
    }

    pub fn push_index(&mut self, index: usize) {
        self.segments.push(PathSegment::Index(index));
    }

    pub fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn key(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.push_key(key);
        next
    }

    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.push_index(index);
        next
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Index-erased form used for predicate lookup
    pub fn pattern(&self) -> String {
        self.render(|_| String::new())
    }

    fn render(&self, index: impl Fn(usize) -> String) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                PathSegment::Index(i) => {
                    out.push('[');
                    out.push_str(&index(*i));
                    out.push(']');
                }
            }
        }
        out
    }
}

impl fmt::Display for LeafPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("<root>");
        }
        f.write_str(&self.render(|i| i.to_string()))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Predicate lookup keyed by normalized path
#[derive(Debug, Clone)]
pub struct PredicateRegistry {
    rules: HashMap<String, Predicate>,
    sense_collections: Vec<String>,
    fallback: Predicate,
}

impl PredicateRegistry {
    /// Registry with no rules
    pub fn empty(fallback: Predicate) -> Self {
        Self {
            rules: HashMap::new(),
            sense_collections: Vec::new(),
            fallback,
        }
    }

    /// Rules for the fat bundle schema
    pub fn standard() -> Self {
        let mut registry = Self::empty(Predicate::Present);
        registry
            .register("id", Predicate::PresentNonBlank)
            .register("alignment", Predicate::NonEmptyCollection)
            .register("alignment[].th_index", Predicate::Present)
            .register("alignment[].en_index", Predicate::Present);

        for lang in ["th", "en"] {
            registry
                .register(&format!("{lang}.text"), Predicate::PresentNonBlank)
                .register(&format!("{lang}.start_sec"), Predicate::Present)
                .register(&format!("{lang}.end_sec"), Predicate::Present)
                .register(&format!("tokens.{lang}.display"), Predicate::NonEmptyCollection)
                .register(&format!("tokens.{lang}.senses"), Predicate::NonEmptyCollection)
                .register(&format!("tokens.{lang}.word_refs"), Predicate::NonEmptyCollection)
                .register(&format!("tokens.{lang}.display[].text"), Predicate::PresentNonBlank)
                .register(&format!("tokens.{lang}.word_refs[]"), Predicate::PresentNonBlank)
                .register(
                    &format!("tokens.{lang}.senses[].entries[].normalized"),
                    Predicate::ExactBool(true),
                );
        }

        // Only the Thai track is transliterated and dictionary-enriched
        registry
            .register("tokens.th.display[].romanization", Predicate::Present)
            .register("tokens.th.display[].legible", Predicate::Present)
            .register("tokens.en.display[].romanization", Predicate::Exempt)
            .register("tokens.en.display[].legible", Predicate::Exempt)
            .register_senses("tokens.th.senses[].entries", Predicate::SenseCollection)
            .register_senses("tokens.en.senses[].entries", Predicate::Exempt);

        registry
    }

    /// Register (or replace) the rule for a normalized path
    pub fn register(&mut self, pattern: &str, predicate: Predicate) -> &mut Self {
        self.rules.insert(pattern.to_string(), predicate);
        self
    }

    /// Mark a path as a staged sense collection and set its rule
    pub fn register_senses(&mut self, pattern: &str, predicate: Predicate) -> &mut Self {
        if !self.sense_collections.iter().any(|p| p == pattern) {
            self.sense_collections.push(pattern.to_string());
        }
        self.register(pattern, predicate)
    }

    pub fn resolve(&self, pattern: &str) -> Predicate {
        self.rules.get(pattern).copied().unwrap_or(self.fallback)
    }

    pub fn is_sense_collection(&self, pattern: &str) -> bool {
        self.sense_collections.iter().any(|p| p == pattern)
    }

    pub fn evaluate(&self, pattern: &str, value: &Value) -> Completeness {
        self.resolve(pattern).evaluate(value)
    }

    /// Evaluate a typed live value
    pub fn needs_work<T: serde::Serialize + ?Sized>(&self, pattern: &str, leaf: &T) -> bool {
        evaluate_leaf(self.resolve(pattern), leaf).needs_work()
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
