//! Per-token phase: romanization, legible rendering and senses
//!
//! Each token with at least one flagged leaf becomes a job. Jobs fan out
//! with `buffer_unordered` and are written back by index, so completion
//! order never affects the result.

use super::{Enricher, Pass};
use crate::error::FieldDiagnostic;
use crate::predicates::LeafPath;
use crate::types::{EnrichContext, Helper};
use crate::workmap::{SenseGate, WorkMap};
use fatbundle_common::bundle::{word_key, DisplayToken, SenseToken};
use fatbundle_common::Language;
use futures::stream::{self, StreamExt};
use tracing::warn;

/// Flags for one token, read from the WorkMap
#[derive(Debug, Clone)]
pub(super) struct TokenGates {
    pub romanization: bool,
    pub legible: bool,
    pub senses: Option<SenseGate>,
}

impl TokenGates {
    fn any(&self) -> bool {
        self.romanization
            || self.legible
            || self.senses.as_ref().is_some_and(SenseGate::needs_work)
    }
}

pub(super) struct TokenJob {
    pub index: usize,
    pub display: DisplayToken,
    pub senses: SenseToken,
    /// Word-entity key
    pub key: String,
    pub gates: TokenGates,
}

/// Per-pass inputs shared by every token of one layer
pub(super) struct TokenScope<'a> {
    pub lang: Language,
    /// The line the token belongs to
    pub sentence: Option<String>,
    /// The other track's line
    pub translation: Option<String>,
    pub ctx: &'a EnrichContext,
}

impl TokenScope<'_> {
    pub fn base(&self) -> LeafPath {
        LeafPath::root().key("tokens").key(self.lang.code())
    }
}

pub(super) struct TokenOutcome {
    pub index: usize,
    pub display: DisplayToken,
    pub senses: SenseToken,
    pub diagnostics: Vec<FieldDiagnostic>,
}

impl TokenOutcome {
    pub fn note(&mut self, diagnostic: FieldDiagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Collect jobs for tokens that have something flagged
fn token_jobs(workmap: &WorkMap, pass: &Pass, lang: Language) -> Vec<TokenJob> {
    let base = LeafPath::root().key("tokens").key(lang.code());
    let layer = pass.bundle.tokens.layer(lang);

    layer
        .display
        .iter()
        .enumerate()
        .filter_map(|(index, display)| {
            let display_path = base.key("display").index(index);
            let gates = TokenGates {
                romanization: workmap.flag_at(&display_path.key("romanization")),
                legible: workmap.flag_at(&display_path.key("legible")),
                senses: workmap
                    .sense_gate_at(&base.key("senses").index(index).key("entries"))
                    .cloned(),
            };
            if !gates.any() {
                return None;
            }

            let key = layer
                .word_refs
                .get(index)
                .filter(|k| !k.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| word_key(&display.text));

            Some(TokenJob {
                index,
                display: display.clone(),
                senses: layer.senses.get(index).cloned().unwrap_or_default(),
                key,
                gates,
            })
        })
        .collect()
}

impl Enricher {
    pub(super) async fn enrich_tokens(
        &self,
        pass: &mut Pass,
        workmap: &WorkMap,
        lang: Language,
        ctx: &EnrichContext,
    ) {
        let jobs = token_jobs(workmap, pass, lang);
        if jobs.is_empty() {
            return;
        }

        let scope = TokenScope {
            lang,
            sentence: pass.bundle.track(lang).text.clone(),
            translation: pass.bundle.track(lang.other()).text.clone(),
            ctx,
        };

        let mut outcomes: Vec<TokenOutcome> = stream::iter(jobs)
            .map(|job| self.enrich_token(&scope, job))
            .buffer_unordered(self.config.max_concurrent_tokens.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.index);

        for outcome in outcomes {
            let layer = pass.bundle.tokens.layer_mut(lang);
            if let Some(display) = layer.display.get_mut(outcome.index) {
                *display = outcome.display;
            }
            if let Some(senses) = layer.senses.get_mut(outcome.index) {
                *senses = outcome.senses;
            }
            for diagnostic in outcome.diagnostics {
                pass.note(diagnostic);
            }
        }
    }

    async fn enrich_token(&self, scope: &TokenScope<'_>, job: TokenJob) -> TokenOutcome {
        let display_path = scope.base().key("display").index(job.index);
        let mut outcome = TokenOutcome {
            index: job.index,
            display: job.display,
            senses: job.senses,
            diagnostics: Vec::new(),
        };

        if job.gates.romanization {
            self.romanize(scope, &job.key, &display_path, &mut outcome)
                .await;
        }
        if job.gates.legible {
            self.render_legible(scope, &job.key, &display_path, &mut outcome)
                .await;
        }
        if let Some(gate) = &job.gates.senses {
            self.enrich_senses(scope, &job.key, gate, &mut outcome)
                .await;
        }

        outcome
    }

    async fn romanize(
        &self,
        scope: &TokenScope<'_>,
        key: &str,
        display_path: &LeafPath,
        outcome: &mut TokenOutcome,
    ) {
        let path = display_path.key("romanization");
        if !self
            .registry
            .needs_work(&path.pattern(), &outcome.display.romanization)
        {
            return;
        }

        let text = outcome.display.text.clone();
        let transliterator = &self.services.transliterator;
        let source = text.as_str();
        let result = self
            .cache
            .resolve(
                scope.lang,
                key,
                &text,
                |entity| entity.romanization.clone(),
                |entity, value| entity.romanization = Some(value.clone()),
                move || transliterator.transliterate(source),
            )
            .await;

        match result {
            Ok(found) => outcome.display.romanization = Some(found.into_inner()),
            Err(e) => {
                warn!(
                    token = %text,
                    path = %path,
                    error = %e,
                    "Transliteration failed"
                );
                outcome.note(FieldDiagnostic::from_service(
                    &path,
                    Helper::Transliteration,
                    &e,
                ));
            }
        }
    }

    async fn render_legible(
        &self,
        scope: &TokenScope<'_>,
        key: &str,
        display_path: &LeafPath,
        outcome: &mut TokenOutcome,
    ) {
        let path = display_path.key("legible");
        if !self
            .registry
            .needs_work(&path.pattern(), &outcome.display.legible)
        {
            return;
        }

        let Some(phonetic) = outcome.display.romanization.clone() else {
            outcome.note(FieldDiagnostic::not_yet(
                &path,
                Helper::LegibleRendering,
                "requires romanization",
            ));
            return;
        };

        let renderer = &self.services.legible;
        let source = phonetic.as_str();
        let result = self
            .cache
            .resolve(
                scope.lang,
                key,
                &outcome.display.text,
                |entity| entity.legible.clone(),
                |entity, value| entity.legible = Some(value.clone()),
                move || renderer.render(source),
            )
            .await;

        match result {
            Ok(found) => outcome.display.legible = Some(found.into_inner()),
            Err(e) => {
                warn!(
                    token = %outcome.display.text,
                    path = %path,
                    error = %e,
                    "Legible rendering failed"
                );
                outcome.note(FieldDiagnostic::from_service(
                    &path,
                    Helper::LegibleRendering,
                    &e,
                ));
            }
        }
    }
}
