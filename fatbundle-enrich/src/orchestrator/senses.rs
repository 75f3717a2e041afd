//! Staged sense enrichment
//!
//! - Stage A (`Pending`, live empty): dictionary lookup seeds raw entries
//! - Stage B (`Populated`, flagged entries still raw): one normalization
//!   call per token, results replace entries in place
//! - Stage C (all normalized): nothing
//!
//! Seeded ids are `"{word_key}#{n}"`, so an interrupted run and an
//! uninterrupted one produce the same entries.
//!
//! The word entity keeps the raw lookup and the normalized list apart. A
//! cached normalization is reused only for entries whose raw inputs still
//! match the cached lookup, so an edited entry is always sent to the
//! normalizer.

use super::tokens::{TokenOutcome, TokenScope};
use super::Enricher;
use crate::error::FieldDiagnostic;
use crate::predicates::LeafPath;
use crate::types::{DictionarySense, Helper, NormalizeRequest, NormalizedSense, ServiceError};
use crate::workmap::SenseGate;
use fatbundle_common::bundle::SenseEntry;
use fatbundle_common::WordEntity;
use tracing::{debug, warn};

/// Provenance recorded on seeded entries without a source of their own
const DEFAULT_SOURCE: &str = "dictionary";

impl Enricher {
    pub(super) async fn enrich_senses(
        &self,
        scope: &TokenScope<'_>,
        key: &str,
        gate: &SenseGate,
        outcome: &mut TokenOutcome,
    ) {
        let path = scope
            .base()
            .key("senses")
            .index(outcome.index)
            .key("entries");

        match gate {
            SenseGate::Pending => {
                if !outcome.senses.entries.is_empty() {
                    return;
                }
                self.seed_senses(scope, key, &path, outcome).await;

                if self.config.eager_normalize && !outcome.senses.entries.is_empty() {
                    let flags = vec![true; outcome.senses.entries.len()];
                    self.normalize_senses(scope, key, &path, &flags, outcome)
                        .await;
                }
            }
            SenseGate::Populated(_) => {
                let flags = gate.entry_flags();
                self.normalize_senses(scope, key, &path, &flags, outcome)
                    .await;
            }
        }
    }

    /// Stage A
    async fn seed_senses(
        &self,
        scope: &TokenScope<'_>,
        key: &str,
        path: &LeafPath,
        outcome: &mut TokenOutcome,
    ) {
        let dictionary = &self.services.dictionary;
        let lang = scope.lang;
        let text = outcome.display.text.as_str();

        let result = self
            .cache
            .resolve(
                lang,
                key,
                text,
                |entity| entity.senses.clone().or_else(|| entity.lookup.clone()),
                |entity, senses| entity.lookup = Some(senses.clone()),
                move || async move {
                    let raw = dictionary.lookup(lang, text).await?;
                    Ok::<_, ServiceError>(seed_entries(key, raw))
                },
            )
            .await;

        match result {
            Ok(found) => {
                let from_cache = found.is_cached();
                let entries = found.into_inner();
                debug!(
                    token = %outcome.display.text,
                    entries = entries.len(),
                    from_cache,
                    "Seeded senses"
                );
                if entries.is_empty() {
                    outcome.note(FieldDiagnostic::empty(path, Helper::DictionaryLookup));
                }
                outcome.senses.entries = entries;
            }
            Err(e) => {
                warn!(
                    token = %outcome.display.text,
                    path = %path,
                    error = %e,
                    "Dictionary lookup failed"
                );
                outcome.note(FieldDiagnostic::from_service(
                    path,
                    Helper::DictionaryLookup,
                    &e,
                ));
            }
        }
    }

    /// Stage B: normalize flagged entries that are still raw
    async fn normalize_senses(
        &self,
        scope: &TokenScope<'_>,
        key: &str,
        path: &LeafPath,
        flags: &[bool],
        outcome: &mut TokenOutcome,
    ) {
        let marker = format!("{}[].normalized", path.pattern());
        let pending: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(index, flagged)| {
                **flagged
                    && outcome
                        .senses
                        .entries
                        .get(*index)
                        .is_some_and(|entry| self.registry.needs_work(&marker, &entry.normalized))
            })
            .map(|(index, _)| index)
            .collect();

        if pending.is_empty() {
            return;
        }

        let request = NormalizeRequest {
            language: scope.lang,
            token: outcome.display.text.clone(),
            senses: pending
                .iter()
                .map(|&index| outcome.senses.entries[index].clone())
                .collect(),
            sentence: scope.sentence.clone(),
            translation: scope.translation.clone(),
            show_name: scope.ctx.show_name.clone(),
            media_id: scope.ctx.media_id.clone(),
        };
        let whole_token = pending.len() == outcome.senses.entries.len();

        let normalizer = &self.services.normalizer;
        let request_ref = &request;
        let result = self
            .cache
            .resolve(
                scope.lang,
                key,
                &request.token,
                move |entity| cached_normalized(entity, &request_ref.senses),
                move |entity, normalized| {
                    if whole_token {
                        store_normalized(entity, &request_ref.senses, normalized);
                    }
                },
                move || async move {
                    let results = normalizer.normalize(request_ref).await?;
                    if results.len() != request_ref.senses.len() {
                        return Err(ServiceError::Contract(format!(
                            "normalizer returned {} senses for {} entries",
                            results.len(),
                            request_ref.senses.len()
                        )));
                    }
                    Ok::<Vec<SenseEntry>, ServiceError>(
                        request_ref
                            .senses
                            .iter()
                            .zip(results)
                            .map(|(original, normalized)| apply_normalized(original, normalized))
                            .collect(),
                    )
                },
            )
            .await;

        match result {
            Ok(found) => {
                debug!(
                    token = %request.token,
                    entries = pending.len(),
                    from_cache = found.is_cached(),
                    "Normalized senses"
                );
                for (index, entry) in pending.iter().zip(found.into_inner()) {
                    if let Some(slot) = outcome.senses.entries.get_mut(*index) {
                        *slot = entry;
                    }
                }
            }
            Err(e) => {
                warn!(
                    token = %request.token,
                    path = %path,
                    error = %e,
                    "Sense normalization failed"
                );
                for index in &pending {
                    outcome.note(FieldDiagnostic::from_service(
                        path.index(*index),
                        Helper::Normalization,
                        &e,
                    ));
                }
            }
        }
    }
}

/// Raw entries with deterministic ids
fn seed_entries(key: &str, raw: Vec<DictionarySense>) -> Vec<SenseEntry> {
    raw.into_iter()
        .enumerate()
        .map(|(n, sense)| SenseEntry {
            id: format!("{}#{}", key, n),
            part_of_speech: sense.part_of_speech,
            definition: sense.definition,
            gloss: None,
            normalized: false,
            source: sense.source.or_else(|| Some(DEFAULT_SOURCE.to_string())),
        })
        .collect()
}

/// Normalized result keeps the entry's id and provenance
fn apply_normalized(original: &SenseEntry, normalized: NormalizedSense) -> SenseEntry {
    SenseEntry {
        id: original.id.clone(),
        part_of_speech: normalized
            .part_of_speech
            .or_else(|| original.part_of_speech.clone()),
        definition: normalized.definition.or_else(|| original.definition.clone()),
        gloss: normalized.gloss.or_else(|| original.gloss.clone()),
        normalized: true,
        source: original.source.clone(),
    }
}

/// Cached normalization for every raw entry, in order, or `None`
///
/// An entry counts only when the cached lookup holds the same raw inputs
/// under its id.
fn cached_normalized(entity: &WordEntity, raw: &[SenseEntry]) -> Option<Vec<SenseEntry>> {
    let lookup = entity.lookup.as_ref()?;
    let senses = entity.senses.as_ref()?;
    raw.iter()
        .map(|entry| {
            lookup
                .iter()
                .find(|seeded| seeded.same_raw_inputs(entry))?;
            senses
                .iter()
                .find(|s| s.id == entry.id && s.normalized)
                .cloned()
        })
        .collect()
}

/// Store the normalized list when it covers the cached lookup unchanged
fn store_normalized(entity: &mut WordEntity, raw: &[SenseEntry], normalized: &[SenseEntry]) {
    let Some(lookup) = entity.lookup.as_ref() else {
        return;
    };
    let unchanged = lookup.len() == raw.len()
        && lookup
            .iter()
            .zip(raw)
            .all(|(seeded, entry)| seeded.same_raw_inputs(entry));
    if unchanged && normalized.iter().all(|e| e.normalized) {
        entity.senses = Some(normalized.to_vec());
    }
}
