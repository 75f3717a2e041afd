//! Production helper implementations

pub mod http;
pub mod track;

pub use http::HttpHelperClient;
pub use track::WebVttTrackSource;

use crate::types::{EnrichmentServices, ServiceError};
use fatbundle_common::config::ServicesConfig;
use std::sync::Arc;
use std::time::Duration;

/// Wire the HTTP helpers and the subtitle track source
pub fn http_services(
    config: &ServicesConfig,
    normalizer_api_key: Option<String>,
) -> Result<EnrichmentServices, ServiceError> {
    let helpers = Arc::new(HttpHelperClient::new(config.clone(), normalizer_api_key)?);
    let tracks = Arc::new(WebVttTrackSource::new(Duration::from_secs(
        config.timeout_secs.max(1),
    ))?);

    Ok(EnrichmentServices {
        tracks,
        segmenter: helpers.clone(),
        transliterator: helpers.clone(),
        legible: helpers.clone(),
        dictionary: helpers.clone(),
        normalizer: helpers.clone(),
        aligner: helpers,
    })
}
