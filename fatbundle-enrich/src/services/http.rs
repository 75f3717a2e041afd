//! JSON-over-HTTP helper client
//!
//! One client serves every enrichment endpoint configured under
//! `[services]`. Requests are POSTed as JSON and share a single rate
//! limiter, so the configured quota bounds the total request rate across
//! all helpers.

use crate::types::{
    Aligner, Dictionary, DictionarySense, LegibleRenderer, NormalizeRequest, NormalizedSense,
    SenseNormalizer, Segmenter, ServiceError, Transliterator,
};
use async_trait::async_trait;
use fatbundle_common::bundle::TokenAlignment;
use fatbundle_common::config::{get_user_agent, ServicesConfig};
use fatbundle_common::Language;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    language: Language,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct PhoneticRequest<'a> {
    phonetic: &'a str,
}

#[derive(Debug, Serialize)]
struct AlignRequest<'a> {
    th_tokens: &'a [String],
    en_tokens: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransliterateResponse {
    romanization: String,
}

#[derive(Debug, Deserialize)]
struct LegibleResponse {
    legible: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    senses: Vec<DictionarySense>,
}

#[derive(Debug, Deserialize)]
struct NormalizeResponse {
    senses: Vec<NormalizedSense>,
}

#[derive(Debug, Deserialize)]
struct AlignResponse {
    #[serde(default)]
    alignment: Vec<TokenAlignment>,
}

/// HTTP implementation of the per-token and per-layer helpers
pub struct HttpHelperClient {
    client: Client,
    config: ServicesConfig,
    /// Bearer token sent to the normalizer endpoint
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpHelperClient {
    pub fn new(config: ServicesConfig, api_key: Option<String>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(get_user_agent())
            .build()
            .map_err(|e| ServiceError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second.max(1))
            .ok_or_else(|| ServiceError::Api("requests_per_second must be positive".to_string()))?;

        Ok(Self {
            client,
            config,
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req, auth: bool) -> Result<Resp, ServiceError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        self.rate_limiter.until_ready().await;

        let url = self.url(path);
        debug!(url = %url, "Helper request");

        let mut request = self.client.post(&url).json(body);
        if auth {
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("{} request failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited(format!("{} returned 429", url)));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotAvailable(format!("{} returned 404", url)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api(format!("{} returned {}: {}", url, status, text)));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| ServiceError::Parse(format!("{} response: {}", url, e)))
    }
}

#[async_trait]
impl Segmenter for HttpHelperClient {
    async fn segment(&self, lang: Language, text: &str) -> Result<Vec<String>, ServiceError> {
        let response: SegmentResponse = self
            .post(&self.config.segment_path, &TextRequest { language: lang, text }, false)
            .await?;
        Ok(response.tokens)
    }
}

#[async_trait]
impl Transliterator for HttpHelperClient {
    async fn transliterate(&self, text: &str) -> Result<String, ServiceError> {
        let response: TransliterateResponse = self
            .post(
                &self.config.transliterate_path,
                &TextRequest {
                    language: Language::Th,
                    text,
                },
                false,
            )
            .await?;
        Ok(response.romanization)
    }
}

#[async_trait]
impl LegibleRenderer for HttpHelperClient {
    async fn render(&self, phonetic: &str) -> Result<String, ServiceError> {
        let response: LegibleResponse = self
            .post(&self.config.legible_path, &PhoneticRequest { phonetic }, false)
            .await?;
        Ok(response.legible)
    }
}

#[async_trait]
impl Dictionary for HttpHelperClient {
    async fn lookup(
        &self,
        lang: Language,
        text: &str,
    ) -> Result<Vec<DictionarySense>, ServiceError> {
        let response: LookupResponse = self
            .post(&self.config.lookup_path, &TextRequest { language: lang, text }, false)
            .await?;
        Ok(response.senses)
    }
}

#[async_trait]
impl SenseNormalizer for HttpHelperClient {
    async fn normalize(
        &self,
        request: &NormalizeRequest,
    ) -> Result<Vec<NormalizedSense>, ServiceError> {
        let response: NormalizeResponse = self
            .post(&self.config.normalize_path, request, true)
            .await?;
        Ok(response.senses)
    }
}

#[async_trait]
impl Aligner for HttpHelperClient {
    async fn align(
        &self,
        th_tokens: &[String],
        en_tokens: &[String],
    ) -> Result<Vec<TokenAlignment>, ServiceError> {
        let response: AlignResponse = self
            .post(
                &self.config.align_path,
                &AlignRequest {
                    th_tokens,
                    en_tokens,
                },
                false,
            )
            .await?;
        Ok(response.alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpHelperClient::new(ServicesConfig::default(), None);
        assert!(client.is_ok());
    }

    #[test]
    fn test_zero_quota_is_clamped() {
        let config = ServicesConfig {
            requests_per_second: 0,
            ..ServicesConfig::default()
        };
        assert!(HttpHelperClient::new(config, None).is_ok());
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = ServicesConfig {
            base_url: "http://helpers:9000/".to_string(),
            ..ServicesConfig::default()
        };
        let client = HttpHelperClient::new(config, None).unwrap();
        assert_eq!(client.url("/lookup"), "http://helpers:9000/lookup");
        assert_eq!(client.url("align"), "http://helpers:9000/align");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let config = ServicesConfig {
            // Reserved port, nothing listens here
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..ServicesConfig::default()
        };
        let client = HttpHelperClient::new(config, None).unwrap();
        let err = client.transliterate("รถ").await.unwrap_err();
        assert!(matches!(err, ServiceError::Network(_)));
    }
}
