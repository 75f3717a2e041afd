//! Fat bundle document model
//!
//! A fat bundle is the complete per-subtitle document: both language tracks
//! with their timing, the segmented token layers, dictionary senses and the
//! cross-language alignment. Word entities are the shared per-word cache
//! documents that bundles reference through `word_refs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding fat bundles in the document store
pub const BUNDLE_COLLECTION: &str = "bundles";

/// Subtitle track language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Thai (source language, transliterated)
    Th,
    /// English (translation track)
    En,
}

impl Language {
    /// Both tracks, in processing order
    pub const ALL: [Language; 2] = [Language::Th, Language::En];

    /// Short code used as the document key for this track
    pub fn code(self) -> &'static str {
        match self {
            Language::Th => "th",
            Language::En => "en",
        }
    }

    /// The opposite track
    pub fn other(self) -> Language {
        match self {
            Language::Th => Language::En,
            Language::En => Language::Th,
        }
    }

    /// Document-store collection holding this language's word entities
    pub fn word_collection(self) -> &'static str {
        match self {
            Language::Th => "words_th",
            Language::En => "words_en",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Language {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "th" => Ok(Language::Th),
            "en" => Ok(Language::En),
            other => Err(crate::Error::InvalidInput(format!("Unknown language: {}", other))),
        }
    }
}

/// Text and timing of one language track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackLine {
    /// Subtitle text for this track
    pub text: Option<String>,
    /// Cue start (seconds from media start)
    pub start_sec: Option<f64>,
    /// Cue end (seconds from media start)
    pub end_sec: Option<f64>,
}

impl TrackLine {
    /// Track line with timing only (text still to be fetched)
    pub fn timed(start_sec: f64, end_sec: f64) -> Self {
        Self {
            text: None,
            start_sec: Some(start_sec),
            end_sec: Some(end_sec),
        }
    }

    /// Text, if present and not blank
    pub fn text_non_blank(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// One display segment produced by segmentation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayToken {
    /// Segment text as it appears in the subtitle
    pub text: String,
    /// Phonetic transliteration
    pub romanization: Option<String>,
    /// Legible-script rendering of the transliteration
    pub legible: Option<String>,
}

impl DisplayToken {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            romanization: None,
            legible: None,
        }
    }
}

/// One dictionary sense attached to a token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenseEntry {
    /// Addressable identity, stable across normalization
    pub id: String,
    /// Part of speech as reported by the source
    pub part_of_speech: Option<String>,
    /// Definition text
    pub definition: Option<String>,
    /// Short learner gloss (filled by normalization)
    pub gloss: Option<String>,
    /// Marker set once the entry has passed normalization
    #[serde(default)]
    pub normalized: bool,
    /// Provenance of the entry (dictionary or normalizer name)
    pub source: Option<String>,
}

impl SenseEntry {
    /// Same id and same lookup inputs (part of speech, definition, source)
    pub fn same_raw_inputs(&self, other: &SenseEntry) -> bool {
        self.id == other.id
            && self.part_of_speech == other.part_of_speech
            && self.definition == other.definition
            && self.source == other.source
    }
}

/// Sense collection for one token, index-aligned with the display token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenseToken {
    pub entries: Vec<SenseEntry>,
}

impl SenseToken {
    /// True when every entry carries the normalized marker (vacuously false when empty)
    pub fn fully_normalized(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.normalized)
    }
}

/// Parallel token collections for one language
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenLayer {
    /// Ordered display segments
    pub display: Vec<DisplayToken>,
    /// Sense tokens, same index as `display`
    pub senses: Vec<SenseToken>,
    /// Word-entity key for each token position
    pub word_refs: Vec<String>,
}

impl TokenLayer {
    pub fn is_empty(&self) -> bool {
        self.display.is_empty() && self.senses.is_empty() && self.word_refs.is_empty()
    }

    /// Layer arrays are either all empty or all the same length
    pub fn is_consistent(&self) -> bool {
        self.display.len() == self.word_refs.len() && self.senses.len() == self.word_refs.len()
    }
}

/// Token layers for both languages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTracks {
    pub th: TokenLayer,
    pub en: TokenLayer,
}

impl TokenTracks {
    pub fn layer(&self, lang: Language) -> &TokenLayer {
        match lang {
            Language::Th => &self.th,
            Language::En => &self.en,
        }
    }

    pub fn layer_mut(&mut self, lang: Language) -> &mut TokenLayer {
        match lang {
            Language::Th => &mut self.th,
            Language::En => &mut self.en,
        }
    }
}

/// Links a Thai token position to an English token position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAlignment {
    pub th_index: usize,
    pub en_index: usize,
}

/// Complete per-subtitle document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FatBundle {
    /// Unique id, immutable once set
    pub id: Option<String>,
    /// Thai track
    pub th: TrackLine,
    /// English track
    pub en: TrackLine,
    /// Segmented token layers
    pub tokens: TokenTracks,
    /// Cross-language token alignment
    pub alignment: Vec<TokenAlignment>,
}

impl FatBundle {
    /// All-empty bundle for a newly observed subtitle unit
    pub fn template(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn track(&self, lang: Language) -> &TrackLine {
        match lang {
            Language::Th => &self.th,
            Language::En => &self.en,
        }
    }

    pub fn track_mut(&mut self, lang: Language) -> &mut TrackLine {
        match lang {
            Language::Th => &mut self.th,
            Language::En => &mut self.en,
        }
    }

    /// Id for logging (never fails)
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<no-id>")
    }
}

/// Shared per-word computation cache document
///
/// One entity per normalized token text and language. Created, read and
/// updated by the enrichment pipeline on behalf of many bundles; no single
/// bundle owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntity {
    /// Normalized token text (document key)
    pub key: String,
    pub language: Language,
    /// Token text as first seen
    pub text: String,
    pub romanization: Option<String>,
    pub legible: Option<String>,
    /// Raw dictionary senses as seeded. `Some(vec![])` records a lookup
    /// that found nothing.
    #[serde(default)]
    pub lookup: Option<Vec<SenseEntry>>,
    /// Normalized senses, stored only when every entry of `lookup` has been
    /// normalized from unchanged raw inputs
    pub senses: Option<Vec<SenseEntry>>,
    pub updated_at: DateTime<Utc>,
}

impl WordEntity {
    pub fn new(key: impl Into<String>, language: Language, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            language,
            text: text.into(),
            romanization: None,
            legible: None,
            lookup: None,
            senses: None,
            updated_at: Utc::now(),
        }
    }
}

/// Normalize token text into a word-entity key
///
/// Trims, collapses inner whitespace and lowercases. Thai has no case, so
/// lowercasing only affects Latin script.
pub fn word_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
