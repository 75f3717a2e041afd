//! Validation gate
//!
//! Runs before WorkMap generation. A rejected record is never enriched and
//! no helper is called for it; every violation is collected so the caller
//! sees the full list at once.

use fatbundle_common::{FatBundle, Language};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Bundle {bundle_id} failed validation: {}", render(.violations))]
pub struct ValidationError {
    pub bundle_id: String,
    pub violations: Vec<Violation>,
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Structural checks a record must pass before enrichment
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGate;

impl ValidationGate {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, bundle: &FatBundle) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        let mut violate = |path: &str, message: &str| {
            violations.push(Violation {
                path: path.to_string(),
                message: message.to_string(),
            })
        };

        if bundle
            .id
            .as_deref()
            .map(str::trim)
            .map_or(true, str::is_empty)
        {
            violate("id", "id is required");
        }

        for lang in Language::ALL {
            let track = bundle.track(lang);
            if track.start_sec.is_none() || track.end_sec.is_none() {
                violate(
                    &format!("{lang}"),
                    "start and end timing are both required",
                );
            }
        }

        if Language::ALL
            .iter()
            .all(|lang| bundle.track(*lang).text_non_blank().is_none())
        {
            violate("th.text", "at least one track must carry text");
        }

        for lang in Language::ALL {
            let layer = bundle.tokens.layer(lang);
            if !layer.is_consistent() {
                violate(
                    &format!("tokens.{lang}"),
                    &format!(
                        "layer arrays differ in length (display {}, senses {}, word_refs {})",
                        layer.display.len(),
                        layer.senses.len(),
                        layer.word_refs.len()
                    ),
                );
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                bundle_id: bundle.display_id().to_string(),
                violations,
            })
        }
    }
}

/// Check with the default gate
pub fn validate_bundle(bundle: &FatBundle) -> Result<(), ValidationError> {
    ValidationGate::new().check(bundle)
}
