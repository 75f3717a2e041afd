//! Configuration resolution for fatbundle-enrich
//!
//! Multi-tier resolution with ENV → TOML priority for the normalizer API
//! key and the helper service location.

use crate::orchestrator::EnricherConfig;
use fatbundle_common::config::{write_toml_config, ServicesConfig, TomlConfig};
use fatbundle_common::{Error, Result};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable holding the normalizer API key
pub const NORMALIZER_KEY_ENV: &str = "FATBUNDLE_NORMALIZER_API_KEY";

/// Environment variable overriding `[services] base_url`
pub const SERVICES_URL_ENV: &str = "FATBUNDLE_SERVICES_URL";

/// Resolve the normalizer API key
///
/// **Priority:** ENV → TOML. `None` means requests go out unauthenticated.
pub fn resolve_normalizer_api_key(toml_config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var(NORMALIZER_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .normalizer_api_key
        .as_ref()
        .filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Normalizer API key found in multiple sources: environment, TOML. Using environment (highest priority).");
    }

    if let Some(key) = env_key {
        info!("Normalizer API key loaded from environment variable");
        return Some(key);
    }

    if let Some(key) = toml_key {
        info!("Normalizer API key loaded from TOML config");
        return Some(key.clone());
    }

    warn!(
        "Normalizer API key not configured; set {} or normalizer_api_key in the TOML config",
        NORMALIZER_KEY_ENV
    );
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// `[services]` with the environment override applied
pub fn resolve_services(toml_config: &TomlConfig) -> ServicesConfig {
    let mut services = toml_config.services.clone();
    if let Ok(url) = std::env::var(SERVICES_URL_ENV) {
        if !url.trim().is_empty() {
            info!("Helper services URL overridden by {}", SERVICES_URL_ENV);
            services.base_url = url.trim().to_string();
        }
    }
    services
}

pub fn resolve_enricher_config(toml_config: &TomlConfig) -> EnricherConfig {
    EnricherConfig::from(&toml_config.pipeline)
}

/// Store the normalizer API key in the TOML config file
///
/// Other settings in the file are preserved. The write is atomic.
pub fn save_normalizer_api_key(key: &str, toml_path: &Path) -> Result<()> {
    if !is_valid_key(key) {
        return Err(Error::InvalidInput("API key is empty".to_string()));
    }

    let mut config = if toml_path.exists() {
        fatbundle_common::config::load_toml_config(toml_path)?
    } else {
        TomlConfig::default()
    };
    config.normalizer_api_key = Some(key.trim().to_string());

    write_toml_config(&config, toml_path)?;
    info!("Normalizer API key written to {}", toml_path.display());
    Ok(())
}
