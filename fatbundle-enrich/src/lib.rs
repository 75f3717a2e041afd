//! fatbundle-enrich library interface
//!
//! WorkMap-gated enrichment of fat bundles: completeness predicates, the
//! WorkMap generator, the orchestrator and its helper contracts, the shared
//! word-entity cache, the validation gate and the store-backed runner.

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod predicates;
pub mod runner;
pub mod services;
pub mod types;
pub mod validation;
pub mod workmap;

pub use crate::cache::WordCache;
pub use crate::error::{DiagnosticStatus, EnrichError, FieldDiagnostic};
pub use crate::orchestrator::{EnrichEvent, EnrichReport, Enricher, EnricherConfig};
pub use crate::predicates::{Completeness, Predicate, PredicateRegistry};
pub use crate::runner::{BatchSummary, CycleOutcome, Runner};
pub use crate::types::{EnrichContext, EnrichmentServices, Helper, ServiceError};
pub use crate::validation::{validate_bundle, ValidationError};
pub use crate::workmap::{SenseGate, WorkMap, WorkMapGenerator};

use fatbundle_common::DocumentStore;
use std::sync::Arc;

/// Build a runner with the standard registry over one store
///
/// The store backs both bundles and the word-entity cache.
pub fn build_runner(
    store: Arc<dyn DocumentStore>,
    services: EnrichmentServices,
    config: EnricherConfig,
) -> Runner {
    let registry = Arc::new(PredicateRegistry::standard());
    let cache = Arc::new(WordCache::new(store.clone()));
    let enricher = Enricher::new(services, cache, registry.clone()).with_config(config);
    Runner::new(store, WorkMapGenerator::new(registry), enricher)
}
