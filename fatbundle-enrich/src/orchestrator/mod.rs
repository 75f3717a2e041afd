//! Enrichment orchestrator
//!
//! Runs one pass over one bundle, driven by a WorkMap. Only flagged leaves
//! whose live value still fails its predicate are computed; everything else
//! passes through untouched. The WorkMap is read-only.
//!
//! # Phases
//! - **Phase 0**: WorkMap shape check and immutable `id` check
//! - **Phase 1**: Track text/timing (fetch-and-parse, additive merge)
//! - **Phase 2**: Segmentation into token layers (structural, fatal on failure)
//! - **Phase 3**: Per-token romanization, legible rendering and senses
//! - **Phase 4**: Cross-language alignment (derived)
//!
//! # Error Handling
//! - Structural failures abort the pass and leave the input untouched
//! - Per-field and per-token failures become `FieldDiagnostic`s; the next
//!   generated WorkMap re-flags the leaf

mod senses;
mod tokens;

use crate::cache::WordCache;
use crate::error::{EnrichError, FieldDiagnostic};
use crate::predicates::{LeafPath, PredicateRegistry};
use crate::types::{CueQuery, EnrichContext, EnrichmentServices, Helper, ServiceError};
use crate::workmap::WorkMap;
use fatbundle_common::bundle::{word_key, DisplayToken, SenseToken, TokenAlignment};
use fatbundle_common::config::PipelineSettings;
use fatbundle_common::{FatBundle, Language};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EnricherConfig {
    /// Tokens enriched concurrently within one pass
    pub max_concurrent_tokens: usize,
    /// Bundles processed concurrently by `process_batch`
    pub max_concurrent_records: usize,
    /// Normalize freshly looked-up senses in the same pass
    pub eager_normalize: bool,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for EnricherConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            max_concurrent_tokens: settings.max_concurrent_tokens.max(1),
            max_concurrent_records: settings.max_concurrent_records.max(1),
            eager_normalize: settings.eager_normalize,
        }
    }
}

/// Progress events emitted during a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EnrichEvent {
    PassStarted {
        bundle_id: String,
        pending: usize,
    },
    PassCompleted {
        bundle_id: String,
        diagnostics: usize,
        failures: usize,
    },
    PassAborted {
        bundle_id: String,
        error: String,
    },
}

/// Result of one pass
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichReport {
    /// Enriched copy of the input bundle
    pub bundle: FatBundle,
    /// One entry per flagged leaf that is still unfilled
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl EnrichReport {
    pub fn failures(&self) -> impl Iterator<Item = &FieldDiagnostic> {
        self.diagnostics.iter().filter(|d| d.is_failure())
    }
}

/// Working state of one pass
struct Pass {
    bundle: FatBundle,
    diagnostics: Vec<FieldDiagnostic>,
}

impl Pass {
    fn note(&mut self, diagnostic: FieldDiagnostic) {
        debug!(
            bundle_id = %self.bundle.display_id(),
            diagnostic = %diagnostic,
            "Leaf left unfilled"
        );
        self.diagnostics.push(diagnostic);
    }
}

/// Enrichment orchestrator
pub struct Enricher {
    services: EnrichmentServices,
    cache: Arc<WordCache>,
    registry: Arc<PredicateRegistry>,
    config: EnricherConfig,
    event_tx: Option<mpsc::Sender<EnrichEvent>>,
}

impl Enricher {
    pub fn new(
        services: EnrichmentServices,
        cache: Arc<WordCache>,
        registry: Arc<PredicateRegistry>,
    ) -> Self {
        Self {
            services,
            cache,
            registry,
            config: EnricherConfig::default(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: EnricherConfig) -> Self {
        self.config = config;
        self
    }

    /// Report pass progress on `event_tx`
    pub fn with_events(mut self, event_tx: mpsc::Sender<EnrichEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    pub fn registry(&self) -> &PredicateRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<WordCache> {
        &self.cache
    }

    /// Run one pass over `bundle` gated by `workmap`
    ///
    /// Returns the enriched copy plus diagnostics. The input bundle and
    /// workmap are never modified.
    pub async fn process(
        &self,
        bundle: &FatBundle,
        workmap: &WorkMap,
        ctx: &EnrichContext,
    ) -> Result<EnrichReport, EnrichError> {
        // Phase 0: structural preconditions, before any helper call
        let record = serde_json::to_value(bundle)?;
        workmap.conforms_to(&record)?;

        if self
            .registry
            .evaluate("id", record.get("id").unwrap_or(&Value::Null))
            .needs_work()
        {
            return Err(EnrichError::ImmutableField {
                path: "id".to_string(),
            });
        }

        let bundle_id = bundle.display_id().to_string();
        if workmap.is_satisfied() {
            debug!(bundle_id = %bundle_id, "Nothing flagged, pass skipped");
            return Ok(EnrichReport {
                bundle: bundle.clone(),
                diagnostics: Vec::new(),
            });
        }

        let pending = workmap.pending_paths().len();
        info!(bundle_id = %bundle_id, pending, "Enrichment pass started");
        self.emit(EnrichEvent::PassStarted {
            bundle_id: bundle_id.clone(),
            pending,
        })
        .await;

        let mut pass = Pass {
            bundle: bundle.clone(),
            diagnostics: Vec::new(),
        };

        // Phase 1: track text and timing
        for lang in Language::ALL {
            self.fill_track(&mut pass, workmap, lang, ctx).await;
        }

        // Phase 2: segmentation
        for lang in Language::ALL {
            if let Err(e) = self.segment_layer(&mut pass, workmap, lang).await {
                warn!(bundle_id = %bundle_id, error = %e, "Enrichment pass aborted");
                self.emit(EnrichEvent::PassAborted {
                    bundle_id: bundle_id.clone(),
                    error: e.to_string(),
                })
                .await;
                return Err(e);
            }
        }

        // Phase 3: per-token enrichment
        for lang in Language::ALL {
            self.enrich_tokens(&mut pass, workmap, lang, ctx).await;
        }

        // Phase 4: alignment
        self.align(&mut pass, workmap).await;

        let report = EnrichReport {
            bundle: pass.bundle,
            diagnostics: pass.diagnostics,
        };
        let failures = report.failures().count();
        info!(
            bundle_id = %bundle_id,
            diagnostics = report.diagnostics.len(),
            failures,
            "Enrichment pass completed"
        );
        self.emit(EnrichEvent::PassCompleted {
            bundle_id,
            diagnostics: report.diagnostics.len(),
            failures,
        })
        .await;

        Ok(report)
    }

    /// Run passes for several bundles concurrently
    ///
    /// Results are returned in input order. One bundle's error never
    /// affects another.
    pub async fn process_batch(
        &self,
        batch: Vec<(FatBundle, WorkMap)>,
        ctx: &EnrichContext,
    ) -> Vec<Result<EnrichReport, EnrichError>> {
        let mut results: Vec<(usize, Result<EnrichReport, EnrichError>)> =
            stream::iter(batch.into_iter().enumerate())
                .map(|(index, (bundle, workmap))| async move {
                    (index, self.process(&bundle, &workmap, ctx).await)
                })
                .buffer_unordered(self.config.max_concurrent_records.max(1))
                .collect()
                .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Flag set and live value still failing its predicate
    fn wants<T: Serialize + ?Sized>(&self, workmap: &WorkMap, path: &LeafPath, live: &T) -> bool {
        workmap.flag_at(path) && self.registry.needs_work(&path.pattern(), live)
    }

    async fn fill_track(
        &self,
        pass: &mut Pass,
        workmap: &WorkMap,
        lang: Language,
        ctx: &EnrichContext,
    ) {
        let base = LeafPath::root().key(lang.code());
        let text_path = base.key("text");
        let start_path = base.key("start_sec");
        let end_path = base.key("end_sec");

        let track = pass.bundle.track(lang);
        let wants_text = self.wants(workmap, &text_path, &track.text);
        let wants_start = self.wants(workmap, &start_path, &track.start_sec);
        let wants_end = self.wants(workmap, &end_path, &track.end_sec);
        if !(wants_text || wants_start || wants_end) {
            return;
        }

        let other = pass.bundle.track(lang.other());
        let query = CueQuery {
            start_sec: track.start_sec.or(other.start_sec),
            end_sec: track.end_sec.or(other.end_sec),
        };
        let wanted: Vec<&LeafPath> = [
            (wants_text, &text_path),
            (wants_start, &start_path),
            (wants_end, &end_path),
        ]
        .into_iter()
        .filter_map(|(wanted, path)| wanted.then_some(path))
        .collect();

        debug!(
            bundle_id = %pass.bundle.display_id(),
            language = %lang,
            fields = wanted.len(),
            "Fetching track cue"
        );

        match self.services.tracks.fetch_cue(lang, &query, ctx).await {
            Ok(Some(cue)) => {
                let mut empty_text = false;
                let track = pass.bundle.track_mut(lang);
                if wants_text {
                    if cue.text.trim().is_empty() {
                        empty_text = true;
                    } else {
                        track.text = Some(cue.text.clone());
                    }
                }
                if wants_start {
                    track.start_sec = Some(cue.start_sec);
                }
                if wants_end {
                    track.end_sec = Some(cue.end_sec);
                }
                if empty_text {
                    pass.note(FieldDiagnostic::empty(&text_path, Helper::TrackFetch));
                }
            }
            Ok(None) => {
                for path in wanted {
                    pass.note(FieldDiagnostic::empty(path, Helper::TrackFetch));
                }
            }
            Err(e) => {
                warn!(
                    bundle_id = %pass.bundle.display_id(),
                    language = %lang,
                    error = %e,
                    "Track fetch failed"
                );
                for path in wanted {
                    pass.note(FieldDiagnostic::from_service(path, Helper::TrackFetch, &e));
                }
            }
        }
    }

    async fn segment_layer(
        &self,
        pass: &mut Pass,
        workmap: &WorkMap,
        lang: Language,
    ) -> Result<(), EnrichError> {
        let path = LeafPath::root()
            .key("tokens")
            .key(lang.code())
            .key("display");

        let layer = pass.bundle.tokens.layer(lang);
        if !self.wants(workmap, &path, &layer.display) {
            return Ok(());
        }
        if !layer.is_empty() {
            pass.note(FieldDiagnostic::failed(
                &path,
                Helper::Segmentation,
                "token layer is partially populated",
            ));
            return Ok(());
        }

        let Some(text) = pass.bundle.track(lang).text_non_blank().map(str::to_string) else {
            pass.note(FieldDiagnostic::not_yet(
                &path,
                Helper::Segmentation,
                "track text not available",
            ));
            return Ok(());
        };

        let segments = self
            .services
            .segmenter
            .segment(lang, &text)
            .await
            .map_err(|source| EnrichError::TransientHelper {
                helper: Helper::Segmentation,
                path: path.to_string(),
                source,
            })?;

        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if segments.is_empty() {
            pass.note(FieldDiagnostic::empty(&path, Helper::Segmentation));
            return Ok(());
        }

        debug!(
            bundle_id = %pass.bundle.display_id(),
            language = %lang,
            tokens = segments.len(),
            "Segmented track"
        );

        let layer = pass.bundle.tokens.layer_mut(lang);
        layer.word_refs = segments.iter().map(|s| word_key(s)).collect();
        layer.senses = vec![SenseToken::default(); segments.len()];
        layer.display = segments.into_iter().map(DisplayToken::new).collect();
        Ok(())
    }

    async fn align(&self, pass: &mut Pass, workmap: &WorkMap) {
        let path = LeafPath::root().key("alignment");
        if !self.wants(workmap, &path, &pass.bundle.alignment) {
            return;
        }

        let texts = |lang: Language| -> Vec<String> {
            pass.bundle
                .tokens
                .layer(lang)
                .display
                .iter()
                .map(|t| t.text.clone())
                .collect()
        };
        let th = texts(Language::Th);
        let en = texts(Language::En);

        if th.is_empty() || en.is_empty() {
            pass.note(FieldDiagnostic::not_yet(
                &path,
                Helper::Alignment,
                "both token layers are required",
            ));
            return;
        }

        let result = self
            .services
            .aligner
            .align(&th, &en)
            .await
            .and_then(|pairs| check_alignment(pairs, th.len(), en.len()));

        match result {
            Ok(pairs) if pairs.is_empty() => {
                pass.note(FieldDiagnostic::empty(&path, Helper::Alignment));
            }
            Ok(pairs) => {
                debug!(
                    bundle_id = %pass.bundle.display_id(),
                    pairs = pairs.len(),
                    "Aligned token layers"
                );
                pass.bundle.alignment = pairs;
            }
            Err(e) => {
                warn!(
                    bundle_id = %pass.bundle.display_id(),
                    error = %e,
                    "Alignment failed"
                );
                pass.note(FieldDiagnostic::from_service(&path, Helper::Alignment, &e));
            }
        }
    }

    async fn emit(&self, event: EnrichEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.send(event).await.is_err() {
                debug!("Enrich event receiver dropped");
            }
        }
    }
}

/// Reject pairs pointing outside either layer
fn check_alignment(
    pairs: Vec<TokenAlignment>,
    th_len: usize,
    en_len: usize,
) -> Result<Vec<TokenAlignment>, ServiceError> {
    match pairs
        .iter()
        .find(|p| p.th_index >= th_len || p.en_index >= en_len)
    {
        Some(bad) => Err(ServiceError::Contract(format!(
            "alignment pair ({}, {}) outside layers of {} and {} tokens",
            bad.th_index, bad.en_index, th_len, en_len
        ))),
        None => Ok(pairs),
    }
}
