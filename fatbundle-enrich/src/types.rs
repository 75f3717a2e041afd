//! Enrichment service contracts
//!
//! Every external helper the orchestrator calls is an async trait object so
//! the pipeline can run against HTTP services, local fakes or test mocks.
//! Each call is a single request/response and must be safe to repeat with
//! the same input.
//!
//! | Trait | Computes |
//! |---|---|
//! | `TrackSource` | text and timing of one language track (fetch + parse) |
//! | `Segmenter` | ordered display tokens |
//! | `Transliterator` | phonetic romanization of one token |
//! | `LegibleRenderer` | legible-script rendering of a romanization |
//! | `Dictionary` | raw dictionary senses of one token |
//! | `SenseNormalizer` | AI-normalized senses (same count as input) |
//! | `Aligner` | Thai ↔ English token alignment |

use async_trait::async_trait;
use fatbundle_common::bundle::{SenseEntry, TokenAlignment};
use fatbundle_common::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Pass context
// ============================================================================

/// Per-pass context passed explicitly into every orchestrator call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichContext {
    /// Media (episode/film) identifier
    pub media_id: Option<String>,
    /// Show name, forwarded to sense normalization
    pub show_name: Option<String>,
    /// Subtitle track location per language (URL or local path)
    #[serde(default)]
    pub track_urls: BTreeMap<Language, String>,
}

impl EnrichContext {
    pub fn with_track(mut self, lang: Language, url: impl Into<String>) -> Self {
        self.track_urls.insert(lang, url.into());
        self
    }
}

// ============================================================================
// Helper identity
// ============================================================================

/// Which helper a leaf depends on (used in diagnostics and errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Helper {
    TrackFetch,
    Segmentation,
    Transliteration,
    LegibleRendering,
    DictionaryLookup,
    Normalization,
    Alignment,
}

impl Helper {
    pub fn name(self) -> &'static str {
        match self {
            Helper::TrackFetch => "track-fetch",
            Helper::Segmentation => "segmentation",
            Helper::Transliteration => "transliteration",
            Helper::LegibleRendering => "legible-rendering",
            Helper::DictionaryLookup => "dictionary-lookup",
            Helper::Normalization => "normalization",
            Helper::Alignment => "alignment",
        }
    }
}

impl fmt::Display for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Helper call error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Service answered with an error status
    #[error("API error: {0}")]
    Api(String),

    /// Failed to parse response or data
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input the helper needs is not available yet (missing track URL, ...)
    #[error("Not available: {0}")]
    NotAvailable(String),

    /// Provider rate limit hit
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Response violated the call contract (wrong count, bad index, ...)
    #[error("Contract violation: {0}")]
    Contract(String),
}

// ============================================================================
// Request / response types
// ============================================================================

/// Span used to pick cues out of a subtitle track
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CueQuery {
    pub start_sec: Option<f64>,
    pub end_sec: Option<f64>,
}

/// Text and timing parsed from a subtitle track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

/// Raw sense as returned by a dictionary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DictionarySense {
    pub part_of_speech: Option<String>,
    pub definition: Option<String>,
    pub source: Option<String>,
}

/// Input to the AI sense normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub language: Language,
    /// Underlying token text
    pub token: String,
    /// Entries to normalize, in order
    pub senses: Vec<SenseEntry>,
    /// Full subtitle line in the token's language
    pub sentence: Option<String>,
    /// The other track's line (translation context)
    pub translation: Option<String>,
    pub show_name: Option<String>,
    pub media_id: Option<String>,
}

/// One normalized sense, position-matched with the request entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSense {
    pub part_of_speech: Option<String>,
    pub definition: Option<String>,
    pub gloss: Option<String>,
}

// ============================================================================
// Service traits
// ============================================================================

/// Fetch-and-parse of a subtitle track
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Cue text/timing for `lang` covering `query`; `None` when no cue overlaps
    async fn fetch_cue(
        &self,
        lang: Language,
        query: &CueQuery,
        ctx: &EnrichContext,
    ) -> Result<Option<Cue>, ServiceError>;
}

#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, lang: Language, text: &str) -> Result<Vec<String>, ServiceError>;
}

#[async_trait]
pub trait Transliterator: Send + Sync {
    async fn transliterate(&self, text: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait LegibleRenderer: Send + Sync {
    async fn render(&self, phonetic: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait Dictionary: Send + Sync {
    async fn lookup(&self, lang: Language, text: &str)
        -> Result<Vec<DictionarySense>, ServiceError>;
}

#[async_trait]
pub trait SenseNormalizer: Send + Sync {
    /// Must return exactly one sense per request entry
    async fn normalize(&self, request: &NormalizeRequest)
        -> Result<Vec<NormalizedSense>, ServiceError>;
}

#[async_trait]
pub trait Aligner: Send + Sync {
    async fn align(
        &self,
        th_tokens: &[String],
        en_tokens: &[String],
    ) -> Result<Vec<TokenAlignment>, ServiceError>;
}

/// The full helper set injected into the orchestrator
#[derive(Clone)]
pub struct EnrichmentServices {
    pub tracks: Arc<dyn TrackSource>,
    pub segmenter: Arc<dyn Segmenter>,
    pub transliterator: Arc<dyn Transliterator>,
    pub legible: Arc<dyn LegibleRenderer>,
    pub dictionary: Arc<dyn Dictionary>,
    pub normalizer: Arc<dyn SenseNormalizer>,
    pub aligner: Arc<dyn Aligner>,
}

impl EnrichmentServices {
    /// Use one implementation for every helper
    pub fn from_single<T>(helper: Arc<T>) -> Self
    where
        T: TrackSource
            + Segmenter
            + Transliterator
            + LegibleRenderer
            + Dictionary
            + SenseNormalizer
            + Aligner
            + 'static,
    {
        Self {
            tracks: helper.clone(),
            segmenter: helper.clone(),
            transliterator: helper.clone(),
            legible: helper.clone(),
            dictionary: helper.clone(),
            normalizer: helper.clone(),
            aligner: helper,
        }
    }
}

impl EnrichmentServices {
    /// Helper set that answers every call with `NotAvailable`
    pub fn unavailable() -> Self {
        Self::from_single(Arc::new(Unavailable))
    }
}

/// Stand-in helper for store-only operations
struct Unavailable;

fn unavailable<T>(helper: Helper) -> Result<T, ServiceError> {
    Err(ServiceError::NotAvailable(format!("{} is not configured", helper)))
}

#[async_trait]
impl TrackSource for Unavailable {
    async fn fetch_cue(
        &self,
        _lang: Language,
        _query: &CueQuery,
        _ctx: &EnrichContext,
    ) -> Result<Option<Cue>, ServiceError> {
        unavailable(Helper::TrackFetch)
    }
}

#[async_trait]
impl Segmenter for Unavailable {
    async fn segment(&self, _lang: Language, _text: &str) -> Result<Vec<String>, ServiceError> {
        unavailable(Helper::Segmentation)
    }
}

#[async_trait]
impl Transliterator for Unavailable {
    async fn transliterate(&self, _text: &str) -> Result<String, ServiceError> {
        unavailable(Helper::Transliteration)
    }
}

#[async_trait]
impl LegibleRenderer for Unavailable {
    async fn render(&self, _phonetic: &str) -> Result<String, ServiceError> {
        unavailable(Helper::LegibleRendering)
    }
}

#[async_trait]
impl Dictionary for Unavailable {
    async fn lookup(
        &self,
        _lang: Language,
        _text: &str,
    ) -> Result<Vec<DictionarySense>, ServiceError> {
        unavailable(Helper::DictionaryLookup)
    }
}

#[async_trait]
impl SenseNormalizer for Unavailable {
    async fn normalize(
        &self,
        _request: &NormalizeRequest,
    ) -> Result<Vec<NormalizedSense>, ServiceError> {
        unavailable(Helper::Normalization)
    }
}

#[async_trait]
impl Aligner for Unavailable {
    async fn align(
        &self,
        _th_tokens: &[String],
        _en_tokens: &[String],
    ) -> Result<Vec<TokenAlignment>, ServiceError> {
        unavailable(Helper::Alignment)
    }
}
