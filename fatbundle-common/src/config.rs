//! Configuration loading and root folder resolution
//!
//! TOML schema shared by every fatbundle binary, plus the root-folder
//! priority chain:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`FATBUNDLE_ROOT_FOLDER`, then `FATBUNDLE_ROOT`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)
//!
//! Missing or unreadable config files never abort startup: the loader logs a
//! warning and falls back to defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "FATBUNDLE_CONFIG";

/// Compiled fallback values for the current platform
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `fatbundle_enrich=debug`, ...)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[services]` section: where the enrichment helpers live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub base_url: String,
    pub segment_path: String,
    pub transliterate_path: String,
    pub legible_path: String,
    pub lookup_path: String,
    pub normalize_path: String,
    pub align_path: String,
    /// Shared request quota for all helper endpoints
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
            segment_path: "/segment".to_string(),
            transliterate_path: "/transliterate".to_string(),
            legible_path: "/legible".to_string(),
            lookup_path: "/lookup".to_string(),
            normalize_path: "/normalize".to_string(),
            align_path: "/align".to_string(),
            requests_per_second: 5,
            timeout_secs: 15,
        }
    }
}

/// `[pipeline]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-token fan-out inside one pass
    pub max_concurrent_tokens: usize,
    /// Bundles processed concurrently in a batch
    pub max_concurrent_records: usize,
    /// Normalize freshly seeded senses in the same pass
    pub eager_normalize: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tokens: 4,
            max_concurrent_records: 2,
            eager_normalize: false,
        }
    }
}

/// On-disk TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// API key for the AI sense normalizer
    #[serde(default)]
    pub normalizer_api_key: Option<String>,
}

/// Default config file location (`~/.config/fatbundle/<module>.toml` on Linux)
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fatbundle").join(format!("{}.toml", module_name)))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Locate and load the config, degrading to defaults
///
/// Priority: explicit path → `FATBUNDLE_CONFIG` → default location.
/// An explicit path that fails to load is still only a warning.
pub fn load_config_or_default(explicit: Option<&Path>, module_name: &str) -> TomlConfig {
    let candidate = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .or_else(|| default_config_path(module_name));

    let Some(path) = candidate else {
        warn!("No config directory available, using defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        debug!("Config file {} not found, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(&path) {
        Ok(config) => {
            debug!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{} - using defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root folder through the priority chain
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// Resolve without a CLI override, reading the module's default config file
    pub fn resolve(&self) -> PathBuf {
        let config = default_config_path(&self.module_name)
            .filter(|p| p.exists())
            .and_then(|p| load_toml_config(&p).ok())
            .unwrap_or_default();
        self.resolve_with(None, &config)
    }

    /// Resolve with an optional CLI argument and an already-loaded config
    pub fn resolve_with(&self, cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        for var in ["FATBUNDLE_ROOT_FOLDER", "FATBUNDLE_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &config.root_folder {
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Prepares the root folder layout
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder (and parents) if missing; idempotent
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("fatbundle.db")
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// User-Agent used by every outbound HTTP client
pub fn get_user_agent() -> String {
    format!("fatbundle/{}", env!("CARGO_PKG_VERSION"))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("fatbundle"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\fatbundle"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("fatbundle"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/fatbundle"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("fatbundle"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/fatbundle"))
    }
}
