//! Unit tests for configuration and graceful degradation
//!
//! Missing or broken config files must never stop startup, and the root
//! folder follows CLI → ENV → TOML → compiled default.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate FATBUNDLE_ROOT_FOLDER, FATBUNDLE_ROOT or
//! FATBUNDLE_CONFIG are marked with #[serial].

use fatbundle_common::config::{
    load_config_or_default, write_toml_config, CompiledDefaults, RootFolderInitializer,
    RootFolderResolver, TomlConfig, CONFIG_PATH_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_root_env() {
    env::remove_var("FATBUNDLE_ROOT_FOLDER");
    env::remove_var("FATBUNDLE_ROOT");
}

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert!(defaults.root_folder.ends_with("fatbundle"));
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.log_file.is_none());
}

#[test]
#[serial]
fn test_resolver_env_var_root_folder() {
    clear_root_env();
    env::set_var("FATBUNDLE_ROOT_FOLDER", "/tmp/fatbundle-test-env-folder");

    let root = RootFolderResolver::new("test-module").resolve_with(None, &TomlConfig::default());
    assert_eq!(root, PathBuf::from("/tmp/fatbundle-test-env-folder"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_root_folder_takes_precedence() {
    clear_root_env();
    env::set_var("FATBUNDLE_ROOT_FOLDER", "/tmp/fatbundle-priority-1");
    env::set_var("FATBUNDLE_ROOT", "/tmp/fatbundle-priority-2");

    let root = RootFolderResolver::new("test-module").resolve_with(None, &TomlConfig::default());
    assert_eq!(root, PathBuf::from("/tmp/fatbundle-priority-1"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_env_beats_toml_and_cli_beats_env() {
    clear_root_env();
    env::set_var("FATBUNDLE_ROOT", "/tmp/fatbundle-env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/fatbundle-toml")),
        ..TomlConfig::default()
    };
    let resolver = RootFolderResolver::new("test-module");

    assert_eq!(
        resolver.resolve_with(None, &config),
        PathBuf::from("/tmp/fatbundle-env")
    );
    assert_eq!(
        resolver.resolve_with(Some(PathBuf::from("/tmp/fatbundle-cli").as_path()), &config),
        PathBuf::from("/tmp/fatbundle-cli")
    );

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_toml_then_default() {
    clear_root_env();
    let resolver = RootFolderResolver::new("test-module");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/fatbundle-toml")),
        ..TomlConfig::default()
    };
    assert_eq!(
        resolver.resolve_with(None, &config),
        PathBuf::from("/tmp/fatbundle-toml")
    );
    assert_eq!(
        resolver.resolve_with(None, &TomlConfig::default()),
        CompiledDefaults::for_current_platform().root_folder
    );
}

#[test]
fn test_initializer_creates_nested_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("a").join("b").join("fatbundle");
    let initializer = RootFolderInitializer::new(root.clone());

    assert!(!initializer.database_exists());
    initializer.ensure_directory_exists().unwrap();
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("fatbundle.db"));
}

#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    env::remove_var(CONFIG_PATH_ENV);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let config = load_config_or_default(Some(&missing), "test-module");
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_broken_config_file_uses_defaults() {
    env::remove_var(CONFIG_PATH_ENV);
    let temp_dir = TempDir::new().unwrap();
    let broken = temp_dir.path().join("broken.toml");
    std::fs::write(&broken, "[pipeline\nmax_concurrent_tokens = ").unwrap();

    let config = load_config_or_default(Some(&broken), "test-module");
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_config_path_from_env() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("from-env.toml");
    let mut written = TomlConfig::default();
    written.pipeline.max_concurrent_records = 6;
    write_toml_config(&written, &path).unwrap();

    env::set_var(CONFIG_PATH_ENV, &path);
    let config = load_config_or_default(None, "test-module");
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(config.pipeline.max_concurrent_records, 6);
}

#[test]
fn test_atomic_write_leaves_no_temp_file() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("fatbundle.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data/subs")),
        normalizer_api_key: Some("key123".to_string()),
        ..TomlConfig::default()
    };
    write_toml_config(&config, &target).unwrap();

    assert!(target.exists());
    assert!(!temp_dir.path().join("fatbundle.toml.tmp").exists());

    let content = std::fs::read_to_string(&target).unwrap();
    assert!(content.contains("normalizer_api_key"));
    let parsed: TomlConfig = toml::from_str(&content).unwrap();
    assert_eq!(parsed, config);
}
