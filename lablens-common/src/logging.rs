//! Tracing subscriber setup
//!
//! `RUST_LOG` always wins; otherwise the TOML `[logging] level` applies to
//! the calling crate and `tower_http`.

use crate::config::{CompiledDefaults, LoggingConfig};
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the default filter directive for a crate
pub fn default_directive(crate_name: &str, config: &LoggingConfig) -> String {
    let level = if config.level.trim().is_empty() {
        CompiledDefaults::for_current_platform().log_level
    } else {
        config.level.trim().to_lowercase()
    };
    format!("{crate_name}={level},tower_http={level}")
}

/// Install the global tracing subscriber
///
/// Writes to the configured log file (appending) when one is set, stdout otherwise.
pub fn init_tracing(crate_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(crate_name, config)));

    let registry = tracing_subscriber::registry().with(filter);

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
                .map_err(|e| Error::Internal(format!("Tracing init failed: {}", e)))
        }
        None => registry
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Tracing init failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_uses_config_level() {
        let config = LoggingConfig {
            level: "DEBUG".to_string(),
            file: None,
        };
        assert_eq!(
            default_directive("lablens_app", &config),
            "lablens_app=debug,tower_http=debug"
        );
    }

    #[test]
    fn test_default_directive_blank_level_falls_back() {
        let config = LoggingConfig {
            level: "  ".to_string(),
            file: None,
        };
        assert_eq!(
            default_directive("lablens_app", &config),
            "lablens_app=info,tower_http=info"
        );
    }
}
