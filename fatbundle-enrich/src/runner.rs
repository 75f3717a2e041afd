//! Enrichment cycles against the document store
//!
//! A cycle is validate → generate → process → persist → blank. The blank
//! WorkMap is produced only after the enriched bundle has been written.

use crate::error::{EnrichError, FieldDiagnostic};
use crate::orchestrator::Enricher;
use crate::types::EnrichContext;
use crate::validation::ValidationGate;
use crate::workmap::{WorkMap, WorkMapGenerator};
use fatbundle_common::bundle::BUNDLE_COLLECTION;
use fatbundle_common::store::{get_typed, put_typed};
use fatbundle_common::{DocumentStore, Error, FatBundle};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// Bundle as persisted
    pub bundle: FatBundle,
    /// All-satisfied map for the next cycle
    pub next_workmap: WorkMap,
    pub diagnostics: Vec<FieldDiagnostic>,
    /// False when nothing was flagged and the store was not written
    pub persisted: bool,
}

/// Per-id results of a batch
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Correlates the batch's log lines
    pub run_id: Uuid,
    pub completed: Vec<(String, CycleOutcome)>,
    pub failed: Vec<(String, EnrichError)>,
    /// Ids not started because the batch was cancelled
    pub skipped: Vec<String>,
}

/// Binds the store, generator and enricher
pub struct Runner {
    store: Arc<dyn DocumentStore>,
    generator: WorkMapGenerator,
    enricher: Enricher,
    gate: ValidationGate,
}

impl Runner {
    pub fn new(store: Arc<dyn DocumentStore>, generator: WorkMapGenerator, enricher: Enricher) -> Self {
        Self {
            store,
            generator,
            enricher,
            gate: ValidationGate::new(),
        }
    }

    pub fn generator(&self) -> &WorkMapGenerator {
        &self.generator
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Load the bundle stored under `id`; its body must carry the same id
    pub async fn load(&self, id: &str) -> Result<FatBundle, EnrichError> {
        let bundle = get_typed::<FatBundle>(self.store.as_ref(), BUNDLE_COLLECTION, id)
            .await?
            .ok_or_else(|| EnrichError::Store(Error::NotFound(format!("bundle {}", id))))?;
        match bundle.id.as_deref() {
            Some(stored) if stored != id => {
                warn!(bundle_id = %id, stored_id = %stored, "Bundle body id differs from its key");
                Err(EnrichError::ImmutableField {
                    path: "id".to_string(),
                })
            }
            _ => Ok(bundle),
        }
    }

    /// Store a bundle under its id
    pub async fn save(&self, bundle: &FatBundle) -> Result<(), EnrichError> {
        let id = bundle
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| EnrichError::ImmutableField {
                path: "id".to_string(),
            })?;
        put_typed(self.store.as_ref(), BUNDLE_COLLECTION, id, bundle).await?;
        Ok(())
    }

    /// Run one full cycle for the stored bundle `id`
    pub async fn enrich_and_persist(
        &self,
        id: &str,
        ctx: &EnrichContext,
    ) -> Result<CycleOutcome, EnrichError> {
        let bundle = self.load(id).await?;
        self.gate.check(&bundle)?;

        let workmap = self.generator.generate(&bundle)?;
        if workmap.is_satisfied() {
            info!(bundle_id = %id, "Bundle already complete");
            return Ok(CycleOutcome {
                bundle,
                next_workmap: workmap,
                diagnostics: Vec::new(),
                persisted: false,
            });
        }

        let report = self.enricher.process(&bundle, &workmap, ctx).await?;
        put_typed(self.store.as_ref(), BUNDLE_COLLECTION, id, &report.bundle).await?;

        let next_workmap = self.generator.blank(&report.bundle)?;
        info!(
            bundle_id = %id,
            diagnostics = report.diagnostics.len(),
            "Cycle persisted"
        );

        Ok(CycleOutcome {
            bundle: report.bundle,
            next_workmap,
            diagnostics: report.diagnostics,
            persisted: true,
        })
    }

    /// Run cycles for many ids concurrently
    ///
    /// Cancellation stops new cycles from starting; cycles already running
    /// finish. Errors are collected per id.
    pub async fn run_batch(
        &self,
        ids: &[String],
        ctx: &EnrichContext,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let limit = self.enricher.config().max_concurrent_records.max(1);
        let run_id = Uuid::new_v4();
        info!(%run_id, bundles = ids.len(), limit, "Batch started");

        let mut results: Vec<(usize, Option<Result<CycleOutcome, EnrichError>>)> =
            stream::iter(ids.iter().enumerate())
                .map(|(index, id)| async move {
                    if cancel.is_cancelled() {
                        return (index, None);
                    }
                    (index, Some(self.enrich_and_persist(id, ctx).await))
                })
                .buffer_unordered(limit)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut summary = BatchSummary {
            run_id,
            ..BatchSummary::default()
        };
        for (index, result) in results {
            let id = ids[index].clone();
            match result {
                Some(Ok(outcome)) => summary.completed.push((id, outcome)),
                Some(Err(e)) => {
                    warn!(%run_id, bundle_id = %id, error = %e, "Cycle failed");
                    summary.failed.push((id, e));
                }
                None => summary.skipped.push(id),
            }
        }

        info!(
            %run_id,
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Batch finished"
        );
        summary
    }
}
