//! Subtitle track fetch and parse
//!
//! Downloads a WebVTT or SRT track (or reads it from disk), parses its cues
//! and answers span queries with the cues that overlap. Parsed tracks are
//! kept per location so consecutive bundles of one episode download the
//! track once. Each location has its own cell, so downloads of different
//! tracks run concurrently. At most `MAX_CACHED_TRACKS` tracks are kept,
//! oldest first out.

use crate::types::{Cue, CueQuery, EnrichContext, ServiceError, TrackSource};
use async_trait::async_trait;
use fatbundle_common::config::get_user_agent;
use fatbundle_common::Language;
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Parse WebVTT or SRT text into cues
///
/// Cues without a valid `start --> end` line are skipped. Markup tags
/// (`<i>`, `<c.yellow>`) are stripped and multi-line text is joined with a
/// space.
pub fn parse_cues(input: &str) -> Vec<Cue> {
    let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(timing) = lines.find(|l| l.contains("-->")) else {
            continue;
        };
        let Some((start, end)) = parse_timing_line(timing) else {
            continue;
        };

        let text = lines
            .map(strip_tags)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        cues.push(Cue {
            start_sec: start,
            end_sec: end,
            text,
        });
    }

    cues
}

fn parse_timing_line(line: &str) -> Option<(f64, f64)> {
    let (start, rest) = line.split_once("-->")?;
    // WebVTT cue settings follow the end timestamp
    let end = rest.split_whitespace().next()?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// `HH:MM:SS.mmm`, `MM:SS.mmm` or SRT's `HH:MM:SS,mmm`
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.replace(',', ".");
    let parts: Vec<&str> = value.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };
    let seconds: f64 = seconds.parse().ok()?;
    if !(0.0..60.0).contains(&seconds) || minutes >= 60 {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Merge every cue overlapping the query span
///
/// Returns `None` without a complete span or when nothing overlaps.
pub fn select_cue(cues: &[Cue], query: &CueQuery) -> Option<Cue> {
    let (start, end) = (query.start_sec?, query.end_sec?);
    let overlapping: Vec<&Cue> = cues
        .iter()
        .filter(|c| c.start_sec < end.max(start + f64::EPSILON) && c.end_sec > start)
        .collect();

    let first = overlapping.first()?;
    Some(Cue {
        start_sec: overlapping
            .iter()
            .map(|c| c.start_sec)
            .fold(first.start_sec, f64::min),
        end_sec: overlapping
            .iter()
            .map(|c| c.end_sec)
            .fold(first.end_sec, f64::max),
        text: overlapping
            .iter()
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    })
}

/// Parsed tracks kept in memory
pub const MAX_CACHED_TRACKS: usize = 16;

type TrackCell = Arc<OnceCell<Arc<Vec<Cue>>>>;

/// Per-location cells in insertion order
#[derive(Default)]
struct TrackCells {
    cells: HashMap<String, TrackCell>,
    order: VecDeque<String>,
}

impl TrackCells {
    fn cell(&mut self, location: &str) -> TrackCell {
        if let Some(cell) = self.cells.get(location) {
            return cell.clone();
        }
        while self.order.len() >= MAX_CACHED_TRACKS {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.cells.remove(&oldest);
        }
        let cell = TrackCell::default();
        self.cells.insert(location.to_string(), cell.clone());
        self.order.push_back(location.to_string());
        cell
    }
}

/// `TrackSource` reading the track location from the pass context
pub struct WebVttTrackSource {
    client: Client,
    tracks: Mutex<TrackCells>,
}

impl WebVttTrackSource {
    pub fn new(timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(get_user_agent())
            .build()
            .map_err(|e| ServiceError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            tracks: Mutex::new(TrackCells::default()),
        })
    }

    /// Parsed cues for a location; a failed load leaves the cell empty
    async fn cues(&self, location: &str) -> Result<Arc<Vec<Cue>>, ServiceError> {
        let cell = self.tracks.lock().await.cell(location);
        cell.get_or_try_init(|| async {
            let body = self.download(location).await?;
            let cues = parse_cues(&body);
            if cues.is_empty() {
                return Err(ServiceError::Parse(format!("{} contains no cues", location)));
            }
            info!(location, cues = cues.len(), "Loaded subtitle track");
            Ok(Arc::new(cues))
        })
        .await
        .cloned()
    }

    async fn download(&self, location: &str) -> Result<String, ServiceError> {
        if !(location.starts_with("http://") || location.starts_with("https://")) {
            let path = location.strip_prefix("file://").unwrap_or(location);
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ServiceError::NotAvailable(format!("{}: {}", path, e)));
        }

        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("{}: {}", location, e)))?;
        if !response.status().is_success() {
            return Err(ServiceError::Api(format!(
                "{} returned {}",
                location,
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| ServiceError::Parse(format!("{}: {}", location, e)))
    }
}

#[async_trait]
impl TrackSource for WebVttTrackSource {
    async fn fetch_cue(
        &self,
        lang: Language,
        query: &CueQuery,
        ctx: &EnrichContext,
    ) -> Result<Option<Cue>, ServiceError> {
        let location = ctx
            .track_urls
            .get(&lang)
            .ok_or_else(|| ServiceError::NotAvailable(format!("no {} track configured", lang)))?;

        if query.start_sec.is_none() || query.end_sec.is_none() {
            return Err(ServiceError::NotAvailable(
                "cue span unknown on both tracks".to_string(),
            ));
        }

        let cues = self.cues(location).await?;
        let cue = select_cue(&cues, query);
        debug!(language = %lang, found = cue.is_some(), "Cue lookup");
        Ok(cue)
    }
}
