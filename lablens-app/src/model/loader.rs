//! Model loader with a local file cache
//!
//! `ModelLoader::ensure_model` returns the shared predictor, fetching the
//! artifact once if it is not on disk and deserializing it once per process.
//! Concurrent callers wait on the same in-flight load. A failed load is
//! reported to everyone who was waiting on it but is not remembered, so the
//! next call starts a fresh attempt.
//!
//! Deserializer settings are validated before anything is fetched, and a
//! freshly downloaded file that fails to load is removed again so it cannot
//! shadow a corrected artifact on the next attempt.

use super::Predictor;
use crate::error::PipelineError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("lablens/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Retrieves a model artifact by remote identifier
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, remote_id: &str) -> Result<Bytes, PipelineError>;
}

/// Turns a model file on disk into a predictor
///
/// `deserialize` is called on a blocking thread; implementations may do heavy
/// CPU work there.
pub trait ArtifactDeserializer: Send + Sync {
    /// Reject settings that no artifact could satisfy
    fn validate(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn deserialize(&self, path: &Path) -> Result<Arc<dyn Predictor>, PipelineError>;
}

/// Fetches artifacts over HTTP(S)
pub struct HttpFetcher {
    http_client: reqwest::Client,
    url_template: String,
}

impl HttpFetcher {
    /// `url_template` must contain `{id}`; `timeout` bounds the whole transfer
    pub fn new(url_template: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        Ok(Self {
            http_client,
            url_template: url_template.to_string(),
        })
    }

    /// Download URL for a remote identifier
    ///
    /// An identifier that is already an http(s) URL is used as-is.
    pub fn resolve_url(&self, remote_id: &str) -> String {
        if remote_id.starts_with("http://") || remote_id.starts_with("https://") {
            remote_id.to_string()
        } else {
            self.url_template.replace("{id}", remote_id)
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, remote_id: &str) -> Result<Bytes, PipelineError> {
        let url = self.resolve_url(remote_id);
        debug!(url = %url, "Fetching model artifact");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Download(format!(
                "{} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        // Share links that need confirmation answer with an HTML page instead of the file
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/html"));
        if is_html {
            return Err(PipelineError::Download(format!(
                "{} returned an HTML page instead of the model file",
                url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;
        if body.is_empty() {
            return Err(PipelineError::Download(format!("{} returned an empty body", url)));
        }

        info!(bytes = body.len(), "Model artifact downloaded");
        Ok(body)
    }
}

/// Observable loader state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum ModelStatus {
    NotLoaded,
    Loading,
    Ready,
    /// Last attempt failed; the next `ensure_model` call retries
    Failed(String),
}

type LoadResult = Result<Arc<dyn Predictor>, PipelineError>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
    Idle { last_error: Option<String> },
    Loading { attempt: u64, load: LoadFuture },
    Ready(Arc<dyn Predictor>),
}

struct Source {
    remote_id: Option<String>,
    local_path: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    deserializer: Arc<dyn ArtifactDeserializer>,
}

/// Obtains the predictor exactly once per process
pub struct ModelLoader {
    source: Arc<Source>,
    slot: Mutex<Slot>,
    attempts: Mutex<u64>,
}

impl ModelLoader {
    /// Without a `remote_id` the model must already exist at `local_path`
    pub fn new(
        remote_id: Option<String>,
        local_path: impl Into<PathBuf>,
        fetcher: Arc<dyn ArtifactFetcher>,
        deserializer: Arc<dyn ArtifactDeserializer>,
    ) -> Self {
        Self {
            source: Arc::new(Source {
                remote_id: remote_id.filter(|id| !id.trim().is_empty()),
                local_path: local_path.into(),
                fetcher,
                deserializer,
            }),
            slot: Mutex::new(Slot::Idle { last_error: None }),
            attempts: Mutex::new(0),
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.source.local_path
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.lock_slot() {
            Slot::Idle { last_error: None } => ModelStatus::NotLoaded,
            Slot::Idle {
                last_error: Some(error),
            } => ModelStatus::Failed(error.clone()),
            Slot::Loading { .. } => ModelStatus::Loading,
            Slot::Ready(_) => ModelStatus::Ready,
        }
    }

    /// The predictor, if it has already been loaded
    pub fn predictor(&self) -> Option<Arc<dyn Predictor>> {
        match &*self.lock_slot() {
            Slot::Ready(predictor) => Some(Arc::clone(predictor)),
            _ => None,
        }
    }

    /// Return the shared predictor, loading it if needed
    pub async fn ensure_model(&self) -> LoadResult {
        let (attempt, load) = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Ready(predictor) => return Ok(Arc::clone(predictor)),
                Slot::Loading { attempt, load } => (*attempt, load.clone()),
                Slot::Idle { .. } => {
                    let attempt = self.next_attempt();
                    let source = Arc::clone(&self.source);
                    let load = async move { source.load().await }.boxed().shared();
                    *slot = Slot::Loading {
                        attempt,
                        load: load.clone(),
                    };
                    (attempt, load)
                }
            }
        };

        let result = load.await;

        // Only the attempt that is still current may settle the slot
        let mut slot = self.lock_slot();
        if matches!(&*slot, Slot::Loading { attempt: current, .. } if *current == attempt) {
            *slot = match &result {
                Ok(predictor) => Slot::Ready(Arc::clone(predictor)),
                Err(error) => {
                    warn!("Model load attempt {} failed: {}", attempt, error);
                    Slot::Idle {
                        last_error: Some(error.to_string()),
                    }
                }
            };
        }

        result
    }

    fn next_attempt(&self) -> u64 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        *attempts += 1;
        *attempts
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Source {
    async fn load(&self) -> LoadResult {
        self.deserializer.validate()?;

        let downloaded = if tokio::fs::metadata(&self.local_path).await.is_ok() {
            info!(path = %self.local_path.display(), "Using cached model file");
            false
        } else {
            let remote_id = self.remote_id.as_deref().ok_or_else(|| {
                PipelineError::Load(format!(
                    "{} does not exist and no model remote_id is configured",
                    self.local_path.display()
                ))
            })?;
            info!(
                remote_id = %remote_id,
                path = %self.local_path.display(),
                "Model file not cached, downloading"
            );
            let bytes = self.fetcher.fetch(remote_id).await?;
            write_atomically(&self.local_path, &bytes).await?;
            true
        };

        let deserializer = Arc::clone(&self.deserializer);
        let path = self.local_path.clone();
        let loaded = tokio::task::spawn_blocking(move || deserializer.deserialize(&path))
            .await
            .map_err(|e| PipelineError::Load(format!("Model load task failed: {}", e)))
            .and_then(|result| result);

        let predictor = match loaded {
            Ok(predictor) => predictor,
            Err(e) => {
                if downloaded {
                    warn!(
                        path = %self.local_path.display(),
                        "Removing downloaded model that failed to load"
                    );
                    if let Err(remove_err) = tokio::fs::remove_file(&self.local_path).await {
                        warn!("Remove {} failed: {}", self.local_path.display(), remove_err);
                    }
                }
                return Err(e);
            }
        };

        info!(labels = predictor.labels().len(), "Model ready");
        Ok(predictor)
    }
}

/// Write through a `.part` sibling and rename, so a crash never leaves a
/// truncated file at `path`
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let write_err = |e: std::io::Error| {
        PipelineError::Download(format!("Write {} failed: {}", path.display(), e))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut part_name = path.as_os_str().to_owned();
    part_name.push(".part");
    let part_path = PathBuf::from(part_name);

    let written = match tokio::fs::write(&part_path, bytes).await {
        Ok(()) => tokio::fs::rename(&part_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&part_path).await;
        return Err(write_err(e));
    }
    Ok(())
}
