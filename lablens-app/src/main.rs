//! LabLens - Main entry point
//!
//! Image classification web app. Serves the single-page UI and its JSON API,
//! downloading and caching the model on first use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lablens_app::content::LabelContentRegistry;
use lablens_app::label::Label;
use lablens_app::model::onnx::parse_labels;
use lablens_app::model::{HttpFetcher, ModelLoader, OnnxDeserializer, OnnxSettings};
use lablens_app::session::spawn_idle_sweep;
use lablens_app::{build_router, AppState};
use lablens_common::config::{
    load_module_config, load_toml_config, ModelConfig, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use tokio::signal;
use tracing::{error, info, warn};

const MODULE_NAME: &str = "lablens";

/// Command-line arguments for lablens
#[derive(Parser, Debug)]
#[command(name = "lablens")]
#[command(about = "Image classification web app")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "LABLENS_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "LABLENS_HOST")]
    host: Option<String>,

    /// Root folder for the cached model and relative paths
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (default: <config dir>/lablens/lablens.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote identifier or URL of the model artifact
    #[arg(long, env = "LABLENS_MODEL_ID")]
    model_id: Option<String>,

    /// Local model file
    #[arg(long, env = "LABLENS_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Label content registry file
    #[arg(long, env = "LABLENS_CONTENT_FILE")]
    content_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => load_module_config(MODULE_NAME),
    };

    lablens_common::logging::init_tracing("lablens_app", &config.logging)
        .context("Failed to initialize logging")?;

    info!(
        "Starting LabLens v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    apply_overrides(&mut config, &args);

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_override(args.root_folder.clone())
        .with_config(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    let registry = match &config.content_file {
        Some(path) => {
            let path = initializer.resolve_path(path);
            LabelContentRegistry::load(&path).context("Failed to load content registry")?
        }
        None => LabelContentRegistry::builtin(),
    };
    info!("Content registry: {} labels", registry.len());

    let labels = load_vocabulary(&config.model, &initializer)?;
    if labels.is_empty() {
        warn!("No label vocabulary configured; the model cannot be loaded until [model] labels or labels_file is set");
    }

    let model_path = initializer.resolve_path(&config.model.file_name);
    if config.model.remote_id.is_none() && !model_path.exists() {
        warn!(
            "No model at {} and no [model] remote_id configured; place an ONNX export there or set LABLENS_MODEL_ID",
            model_path.display()
        );
    }
    let fetcher = HttpFetcher::new(
        &config.model.url_template,
        Duration::from_secs(config.model.download_timeout_secs),
    )
    .context("Failed to create HTTP client")?;
    let deserializer = OnnxDeserializer::new(OnnxSettings::from_config(&config.model, labels));
    let loader = Arc::new(ModelLoader::new(
        config.model.remote_id.clone(),
        model_path,
        Arc::new(fetcher),
        Arc::new(deserializer),
    ));

    let state = AppState::new(loader, registry, config.server.max_upload_bytes);
    spawn_warm_up(state.clone());

    if config.server.session_ttl_secs > 0 {
        let ttl = Duration::from_secs(config.server.session_ttl_secs);
        let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        spawn_idle_sweep(state.sessions.clone(), ttl, period);
        info!("Idle sessions expire after {}s", ttl.as_secs());
    }

    let app = build_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Command-line and environment values win over the config file
fn apply_overrides(config: &mut TomlConfig, args: &Args) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(model_id) = &args.model_id {
        config.model.remote_id = Some(model_id.clone());
    }
    if let Some(model_path) = &args.model_path {
        config.model.file_name = model_path.clone();
    }
    if let Some(content_file) = &args.content_file {
        config.content_file = Some(content_file.clone());
    }
}

/// Inline `labels` first, otherwise one label per line from `labels_file`
fn load_vocabulary(model: &ModelConfig, initializer: &RootFolderInitializer) -> Result<Vec<Label>> {
    if !model.labels.is_empty() {
        return Ok(model.labels.iter().map(|l| Label::new(l.trim())).collect());
    }

    match &model.labels_file {
        Some(path) => {
            let path = initializer.resolve_path(path);
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read labels file {}", path.display()))?;
            Ok(parse_labels(&content))
        }
        None => Ok(Vec::new()),
    }
}

/// Load the model in the background so the first upload does not wait on it
fn spawn_warm_up(state: AppState) {
    tokio::spawn(async move {
        match state.loader.ensure_model().await {
            Ok(predictor) => {
                let unknown = state.registry.unknown_labels(predictor.labels());
                if !unknown.is_empty() {
                    warn!(
                        "Content registry has entries for labels the model does not know: {:?}",
                        unknown
                    );
                }
            }
            Err(e) => error!("Model unavailable: {}", e),
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
