//! Tests for configuration resolution and graceful degradation
//!
//! Covers:
//! - Missing TOML files do not cause termination
//! - Priority order for root folder resolution (CLI > ENV > TOML > default)
//! - Automatic directory creation
//! - TOML schema defaults and round trips
//!
//! Note: Uses serial_test to prevent ENV variable race conditions.
//! Tests that manipulate LABLENS_ROOT_FOLDER or LABLENS_ROOT are marked
//! with #[serial] so they run sequentially.

use lablens_common::config::{
    load_toml_config, CompiledDefaults, LoggingConfig, ModelConfig, OutputKind,
    RootFolderInitializer, RootFolderResolver, ServerConfig, TomlConfig, ENV_ROOT,
    ENV_ROOT_FOLDER,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

fn clear_root_env() {
    env::remove_var(ENV_ROOT_FOLDER);
    env::remove_var(ENV_ROOT);
}

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");

    #[cfg(target_os = "linux")]
    {
        let path_str = defaults.root_folder.to_string_lossy();
        assert!(path_str.ends_with("lablens"), "Linux default should end in lablens");
    }
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    clear_root_env();

    // A module name that will not have a config file
    let resolver = RootFolderResolver::new("nonexistent-test-module-12345");
    let root_folder = resolver.resolve();

    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_root_folder() {
    clear_root_env();
    env::set_var(ENV_ROOT_FOLDER, "/tmp/lablens-test-env-folder");

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/lablens-test-env-folder"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_env_var_root() {
    clear_root_env();
    env::set_var(ENV_ROOT, "/tmp/lablens-test-env-root");

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/lablens-test-env-root"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_root_folder_takes_precedence() {
    clear_root_env();
    env::set_var(ENV_ROOT_FOLDER, "/tmp/lablens-priority-1");
    env::set_var(ENV_ROOT, "/tmp/lablens-priority-2");

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/lablens-priority-1"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_cli_beats_environment() {
    clear_root_env();
    env::set_var(ENV_ROOT_FOLDER, "/tmp/lablens-from-env");

    let root_folder = RootFolderResolver::new("test-module")
        .with_cli_override(Some(PathBuf::from("/tmp/lablens-from-cli")))
        .resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/lablens-from-cli"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_loaded_config_sits_below_environment() {
    clear_root_env();
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/lablens-from-config")),
        ..TomlConfig::default()
    };

    let root_folder = RootFolderResolver::new("test-module").with_config(&config).resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/lablens-from-config"));

    env::set_var(ENV_ROOT, "/tmp/lablens-from-env");
    let root_folder = RootFolderResolver::new("test-module").with_config(&config).resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/lablens-from-env"));

    clear_root_env();
}

#[test]
fn test_initializer_creates_nested_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("level1").join("level2");

    let initializer = RootFolderInitializer::new(root.clone());
    let result = initializer.ensure_directory_exists();

    assert!(result.is_ok(), "Failed to create directory: {:?}", result.err());
    assert!(root.is_dir());

    // Safe to call again
    assert!(initializer.ensure_directory_exists().is_ok());
}

#[test]
fn test_load_toml_config_from_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lablens.toml");
    std::fs::write(
        &path,
        r#"
        root_folder = "/srv/lablens"
        content_file = "content.toml"

        [server]
        port = 9000
        session_ttl_secs = 600

        [model]
        remote_id = "abc123"
        labels = ["cat", "dog"]
        mean = [0.485, 0.456, 0.406]
        "#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/lablens")));
    assert_eq!(config.content_file, Some(PathBuf::from("content.toml")));
    assert_eq!(config.server.port, 9000);
    // Unset keys keep their defaults
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.session_ttl_secs, 600);
    assert_eq!(config.model.remote_id.as_deref(), Some("abc123"));
    assert_eq!(config.model.labels, vec!["cat", "dog"]);
    assert_eq!(config.model.mean, Some([0.485, 0.456, 0.406]));
    assert_eq!(config.model.std, None);
    assert_eq!(config.model.input_width, 224);
}

#[test]
fn test_load_toml_config_invalid_file_is_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("broken.toml");
    std::fs::write(&path, "[server\nport = ").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
fn test_toml_roundtrip() {
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data")),
        content_file: None,
        logging: LoggingConfig::default(),
        server: ServerConfig::default(),
        model: ModelConfig {
            labels: vec!["a".to_string(), "b".to_string()],
            output: OutputKind::Logits,
            ..ModelConfig::default()
        },
    };

    let toml_str = toml::to_string(&config).unwrap();
    let parsed: TomlConfig = toml::from_str(&toml_str).unwrap();

    assert_eq!(parsed, config);
}

#[test]
fn test_empty_file_gives_defaults() {
    let config: TomlConfig = toml::from_str("").unwrap();
    assert_eq!(config, TomlConfig::default());
}
