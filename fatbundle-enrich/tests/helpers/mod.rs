//! Test Helper Utilities
//!
//! Shared fixtures for the fatbundle-enrich integration tests: a scripted
//! helper that counts its calls, bundle builders and enricher wiring.

#![allow(dead_code)]

use async_trait::async_trait;
use fatbundle_common::bundle::{
    word_key, DisplayToken, SenseEntry, SenseToken, TokenAlignment, TrackLine,
};
use fatbundle_common::{DocumentStore, FatBundle, Language, MemoryStore};
use fatbundle_enrich::types::{
    Aligner, Cue, CueQuery, Dictionary, DictionarySense, LegibleRenderer, NormalizeRequest,
    NormalizedSense, SenseNormalizer, Segmenter, TrackSource, Transliterator,
};
use fatbundle_enrich::{
    EnrichContext, Enricher, EnricherConfig, EnrichmentServices, Helper, PredicateRegistry,
    ServiceError, WordCache,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted implementation of every helper contract
///
/// Outputs are deterministic functions of the input so repeated runs can be
/// compared. Failures are injected per helper with `fail`/`recover`.
#[derive(Default)]
pub struct MockHelpers {
    calls: Mutex<HashMap<Helper, usize>>,
    failing: Mutex<HashSet<Helper>>,
    /// Cue text per language; a missing language answers with no cue
    cues: Mutex<HashMap<Language, String>>,
    /// Dictionary senses per token text; unknown tokens get one sense
    senses: Mutex<HashMap<String, Vec<DictionarySense>>>,
    /// Normalizer answers with one sense too few
    short_normalize: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockHelpers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_cue(self: &Arc<Self>, lang: Language, text: &str) -> Arc<Self> {
        self.cues.lock().unwrap().insert(lang, text.to_string());
        self.clone()
    }

    pub fn with_senses(self: &Arc<Self>, token: &str, senses: Vec<DictionarySense>) -> Arc<Self> {
        self.senses.lock().unwrap().insert(token.to_string(), senses);
        self.clone()
    }

    pub fn with_delay(self: &Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = Some(delay);
        self.clone()
    }

    pub fn short_normalize(&self, enabled: bool) {
        *self.short_normalize.lock().unwrap() = enabled;
    }

    pub fn fail(&self, helper: Helper) {
        self.failing.lock().unwrap().insert(helper);
    }

    pub fn recover(&self, helper: Helper) {
        self.failing.lock().unwrap().remove(&helper);
    }

    pub fn calls(&self, helper: Helper) -> usize {
        self.calls.lock().unwrap().get(&helper).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Highest number of simultaneously running helper calls
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, helper: Helper) -> Result<(), ServiceError> {
        *self.calls.lock().unwrap().entry(helper).or_insert(0) += 1;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&helper) {
            return Err(ServiceError::Network(format!("{} unreachable", helper)));
        }
        Ok(())
    }
}

#[async_trait]
impl TrackSource for MockHelpers {
    async fn fetch_cue(
        &self,
        lang: Language,
        query: &CueQuery,
        _ctx: &EnrichContext,
    ) -> Result<Option<Cue>, ServiceError> {
        self.enter(Helper::TrackFetch).await?;
        let text = self.cues.lock().unwrap().get(&lang).cloned();
        Ok(text.map(|text| Cue {
            start_sec: query.start_sec.unwrap_or(0.0),
            end_sec: query.end_sec.unwrap_or(0.0),
            text,
        }))
    }
}

#[async_trait]
impl Segmenter for MockHelpers {
    async fn segment(&self, _lang: Language, text: &str) -> Result<Vec<String>, ServiceError> {
        self.enter(Helper::Segmentation).await?;
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

#[async_trait]
impl Transliterator for MockHelpers {
    async fn transliterate(&self, text: &str) -> Result<String, ServiceError> {
        self.enter(Helper::Transliteration).await?;
        Ok(format!("rom:{}", text))
    }
}

#[async_trait]
impl LegibleRenderer for MockHelpers {
    async fn render(&self, phonetic: &str) -> Result<String, ServiceError> {
        self.enter(Helper::LegibleRendering).await?;
        Ok(format!("leg:{}", phonetic))
    }
}

#[async_trait]
impl Dictionary for MockHelpers {
    async fn lookup(
        &self,
        _lang: Language,
        text: &str,
    ) -> Result<Vec<DictionarySense>, ServiceError> {
        self.enter(Helper::DictionaryLookup).await?;
        let scripted = self.senses.lock().unwrap().get(text).cloned();
        Ok(scripted.unwrap_or_else(|| vec![sense("noun", &format!("meaning of {}", text))]))
    }
}

#[async_trait]
impl SenseNormalizer for MockHelpers {
    async fn normalize(
        &self,
        request: &NormalizeRequest,
    ) -> Result<Vec<NormalizedSense>, ServiceError> {
        self.enter(Helper::Normalization).await?;
        let mut out: Vec<NormalizedSense> = request
            .senses
            .iter()
            .map(|entry| NormalizedSense {
                part_of_speech: entry.part_of_speech.clone(),
                definition: entry.definition.clone(),
                gloss: entry.definition.as_ref().map(|d| format!("gloss:{}", d)),
            })
            .collect();
        if *self.short_normalize.lock().unwrap() {
            out.pop();
        }
        Ok(out)
    }
}

#[async_trait]
impl Aligner for MockHelpers {
    async fn align(
        &self,
        th_tokens: &[String],
        en_tokens: &[String],
    ) -> Result<Vec<TokenAlignment>, ServiceError> {
        self.enter(Helper::Alignment).await?;
        Ok((0..th_tokens.len().min(en_tokens.len()))
            .map(|i| TokenAlignment {
                th_index: i,
                en_index: i,
            })
            .collect())
    }
}

pub fn sense(part_of_speech: &str, definition: &str) -> DictionarySense {
    DictionarySense {
        part_of_speech: Some(part_of_speech.to_string()),
        definition: Some(definition.to_string()),
        source: None,
    }
}

// ============================================================================
// Bundle fixtures
// ============================================================================

/// Timed bundle with optional text on each track
pub fn timed_bundle(id: &str, th_text: Option<&str>, en_text: Option<&str>) -> FatBundle {
    let mut bundle = FatBundle::template(id);
    bundle.th = TrackLine {
        text: th_text.map(str::to_string),
        start_sec: Some(12.0),
        end_sec: Some(14.5),
    };
    bundle.en = TrackLine {
        text: en_text.map(str::to_string),
        start_sec: Some(12.0),
        end_sec: Some(14.5),
    };
    bundle
}

/// Thai layer with the given tokens and empty sense collections
pub fn with_thai_tokens(mut bundle: FatBundle, tokens: &[&str]) -> FatBundle {
    let layer = &mut bundle.tokens.th;
    layer.display = tokens.iter().map(|t| DisplayToken::new(*t)).collect();
    layer.senses = vec![SenseToken::default(); tokens.len()];
    layer.word_refs = tokens.iter().map(|t| word_key(t)).collect();
    bundle
}

/// Raw entry as a dictionary lookup would have seeded it
pub fn raw_entry(key: &str, n: usize, definition: &str) -> SenseEntry {
    SenseEntry {
        id: format!("{}#{}", key, n),
        part_of_speech: Some("noun".to_string()),
        definition: Some(definition.to_string()),
        gloss: None,
        normalized: false,
        source: Some("dictionary".to_string()),
    }
}

/// Fully enriched single-token bundle
pub fn complete_bundle(id: &str) -> FatBundle {
    let mut bundle = with_thai_tokens(timed_bundle(id, Some("รถ"), Some("car")), &["รถ"]);
    bundle.tokens.th.display[0].romanization = Some("rot".to_string());
    bundle.tokens.th.display[0].legible = Some("rót".to_string());
    let mut entry = raw_entry("รถ", 0, "car");
    entry.gloss = Some("car".to_string());
    entry.normalized = true;
    bundle.tokens.th.senses[0].entries = vec![entry];

    bundle.tokens.en.display = vec![DisplayToken::new("car")];
    bundle.tokens.en.senses = vec![SenseToken::default()];
    bundle.tokens.en.word_refs = vec![word_key("car")];
    bundle.alignment = vec![TokenAlignment {
        th_index: 0,
        en_index: 0,
    }];
    bundle
}

// ============================================================================
// Wiring
// ============================================================================

pub fn memory_store() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

pub fn build_enricher(
    helpers: &Arc<MockHelpers>,
    store: Arc<dyn DocumentStore>,
    config: EnricherConfig,
) -> Enricher {
    let services = EnrichmentServices::from_single(helpers.clone());
    let cache = Arc::new(WordCache::new(store));
    Enricher::new(services, cache, Arc::new(PredicateRegistry::standard())).with_config(config)
}

pub fn strict_config() -> EnricherConfig {
    EnricherConfig::default()
}

pub fn eager_config() -> EnricherConfig {
    EnricherConfig {
        eager_normalize: true,
        ..EnricherConfig::default()
    }
}

pub fn ctx() -> EnrichContext {
    EnrichContext {
        media_id: Some("s01e01".to_string()),
        show_name: Some("Test Show".to_string()),
        ..EnrichContext::default()
    }
}
