//! Configuration loading and root folder resolution
//!
//! Every setting resolves with the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: it is logged and the
//! compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary environment variable for the root folder
pub const ENV_ROOT_FOLDER: &str = "LABLENS_ROOT_FOLDER";
/// Alternative environment variable for the root folder
pub const ENV_ROOT: &str = "LABLENS_ROOT";

/// Directory name used under the platform config/data directories
const APP_DIR: &str = "lablens";

/// Local file name of the cached model, relative to the root folder
pub const DEFAULT_MODEL_FILE: &str = "model.onnx";
/// Download URL template; `{id}` is replaced by the remote identifier
///
/// `confirm=t` skips the virus-scan interstitial Google Drive serves for large files.
pub const DEFAULT_URL_TEMPLATE: &str =
    "https://drive.usercontent.google.com/download?id={id}&export=download&confirm=t";
/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5780;
/// Sessions untouched for this long are evicted
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// OS-dependent compiled defaults
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/lablens (or /var/lib/lablens for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib/lablens"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/lablens
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/lablens"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\lablens
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\lablens"))
    } else {
        PathBuf::from("./lablens_data")
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive level ("trace", "debug", "info", ...)
    pub level: String,
    /// Optional log file; stdout when absent
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// HTTP server section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit for image submissions
    pub max_upload_bytes: usize,
    /// Idle time after which a session is dropped; 0 keeps sessions until deleted
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: 20 * 1024 * 1024,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How the model reports its class scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Scores are already a probability distribution
    #[default]
    Probabilities,
    /// Raw logits; softmax is applied after inference
    Logits,
}

/// Model section of the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Remote identifier (or full URL) of the model artifact; without one
    /// the model file must already be present
    pub remote_id: Option<String>,
    /// Local cache file; relative paths are resolved against the root folder
    pub file_name: PathBuf,
    pub url_template: String,
    pub download_timeout_secs: u64,
    /// Label vocabulary in model output order
    pub labels: Vec<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub output: OutputKind,
    /// One label per line; used when `labels` is empty
    pub labels_file: Option<PathBuf>,
    /// Per-channel normalization applied after scaling pixels to [0,1]
    pub mean: Option<[f32; 3]>,
    pub std: Option<[f32; 3]>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            remote_id: None,
            file_name: PathBuf::from(DEFAULT_MODEL_FILE),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            download_timeout_secs: 300,
            labels: Vec::new(),
            input_width: 224,
            input_height: 224,
            output: OutputKind::Probabilities,
            labels_file: None,
            mean: None,
            std: None,
        }
    }
}

/// Contents of `<config dir>/lablens/<module>.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    /// Label content registry file; the built-in registry is used when absent
    pub content_file: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub model: ModelConfig,
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Locate the config file for a module, if one exists
///
/// Checks `~/.config/lablens/<module>.toml` first, then (Linux only)
/// `/etc/lablens/<module>.toml`.
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", module_name);

    if let Some(user_config) = dirs::config_dir().map(|d| d.join(APP_DIR).join(&file_name)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a module's TOML config, falling back to defaults on any problem
pub fn load_module_config(module_name: &str) -> TomlConfig {
    let Some(path) = config_file_path(module_name) else {
        debug!("No config file for {}, using defaults", module_name);
        return TomlConfig::default();
    };

    match load_toml_config(&path) {
        Ok(config) => {
            debug!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{} (using defaults)", e);
            TomlConfig::default()
        }
    }
}

/// Resolves the root folder for a module
pub struct RootFolderResolver {
    module_name: String,
    cli_override: Option<PathBuf>,
    config_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_override: None,
            config_value: None,
        }
    }

    /// Use a command-line value ahead of every other source
    pub fn with_cli_override(mut self, path: Option<PathBuf>) -> Self {
        self.cli_override = path;
        self
    }

    /// Use `root_folder` from an already loaded config instead of looking one up
    pub fn with_config(mut self, config: &TomlConfig) -> Self {
        self.config_value = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_override {
            return path.clone();
        }

        // Priority 2: Environment variables (LABLENS_ROOT_FOLDER wins over LABLENS_ROOT)
        for var in [ENV_ROOT_FOLDER, ENV_ROOT] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.config_value {
            return path.clone();
        }
        if let Some(path) = config_file_path(&self.module_name) {
            match load_toml_config(&path) {
                Ok(config) => {
                    if let Some(root_folder) = config.root_folder {
                        return root_folder;
                    }
                }
                Err(e) => warn!("{} (ignoring root_folder from config)", e),
            }
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Prepares the resolved root folder for use
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder (and parents) if missing; safe to call repeatedly
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    /// Absolute paths are returned unchanged, relative ones are joined to the root folder
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_folder.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_defaults() {
        let model = ModelConfig::default();
        assert_eq!(model.remote_id, None);
        assert_eq!(model.file_name, PathBuf::from("model.onnx"));
        assert_eq!(model.output, OutputKind::Probabilities);
        assert!(model.url_template.contains("{id}"));
    }

    #[test]
    fn test_bind_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.bind_addr(), "127.0.0.1:5780");
        assert_eq!(server.session_ttl_secs, DEFAULT_SESSION_TTL_SECS);
    }

    #[test]
    fn test_resolve_path_relative_and_absolute() {
        let init = RootFolderInitializer::new(PathBuf::from("/srv/lablens"));
        assert_eq!(
            init.resolve_path(Path::new("model.onnx")),
            PathBuf::from("/srv/lablens/model.onnx")
        );
        assert_eq!(
            init.resolve_path(Path::new("/opt/models/m.onnx")),
            PathBuf::from("/opt/models/m.onnx")
        );
    }

    #[test]
    fn test_output_kind_parses_lowercase() {
        let config: TomlConfig = toml::from_str(
            r#"
            [model]
            output = "logits"
            "#,
        )
        .unwrap();
        assert_eq!(config.model.output, OutputKind::Logits);
    }
}
