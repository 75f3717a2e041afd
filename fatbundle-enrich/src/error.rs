//! Error and diagnostic types for fatbundle-enrich
//!
//! `EnrichError` aborts a pass (or refuses to start one). Everything else a
//! helper can go wrong with is reported as a `FieldDiagnostic` next to the
//! partially enriched record.

use crate::types::{Helper, ServiceError};
use crate::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pass-level error
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Record rejected by the validation gate
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A field the pipeline must never produce is missing
    #[error("Immutable field '{path}' is missing or blank; refusing to enrich")]
    ImmutableField { path: String },

    /// A structural helper failed; the pass was abandoned
    #[error("{helper} failed at '{path}': {source}")]
    TransientHelper {
        helper: Helper,
        path: String,
        #[source]
        source: ServiceError,
    },

    /// WorkMap does not mirror the record
    #[error("WorkMap shape mismatch at '{path}': expected {expected}, found {found}")]
    ShapeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// Document store failure
    #[error("Store error: {0}")]
    Store(#[from] fatbundle_common::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a flagged leaf is still empty after a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DiagnosticStatus {
    /// A prerequisite is missing; a later pass may fill it
    NotYetComputed(String),
    /// The helper ran and legitimately returned nothing
    ComputedEmpty,
    /// The helper failed; the leaf stays flagged for the next pass
    Failed(String),
}

/// Per-leaf outcome reported alongside a pass result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiagnostic {
    pub path: String,
    pub helper: Helper,
    #[serde(flatten)]
    pub status: DiagnosticStatus,
}

impl FieldDiagnostic {
    pub fn not_yet(path: impl fmt::Display, helper: Helper, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            helper,
            status: DiagnosticStatus::NotYetComputed(reason.into()),
        }
    }

    pub fn empty(path: impl fmt::Display, helper: Helper) -> Self {
        Self {
            path: path.to_string(),
            helper,
            status: DiagnosticStatus::ComputedEmpty,
        }
    }

    pub fn failed(path: impl fmt::Display, helper: Helper, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            helper,
            status: DiagnosticStatus::Failed(reason.into()),
        }
    }

    /// Map a helper error; unavailable inputs are "not yet", the rest failures
    pub fn from_service(path: impl fmt::Display, helper: Helper, error: &ServiceError) -> Self {
        match error {
            ServiceError::NotAvailable(reason) => Self::not_yet(path, helper, reason.clone()),
            other => Self::failed(path, helper, other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, DiagnosticStatus::Failed(_))
    }
}

impl fmt::Display for FieldDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            DiagnosticStatus::NotYetComputed(reason) => {
                write!(f, "{} ({}): not yet computed: {}", self.path, self.helper, reason)
            }
            DiagnosticStatus::ComputedEmpty => {
                write!(f, "{} ({}): computed, empty", self.path, self.helper)
            }
            DiagnosticStatus::Failed(reason) => {
                write!(f, "{} ({}): failed: {}", self.path, self.helper, reason)
            }
        }
    }
}
