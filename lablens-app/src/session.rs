//! Per-user classify sessions
//!
//! A session moves `Empty → ImageReady → Predicted`. Submitting a new image
//! from any phase returns to `ImageReady` and drops the old prediction.
//! State transitions consume the current `SessionState` and hand back the
//! next one, so a failed step returns the state it started from.

use crate::error::PipelineError;
use crate::imaging;
use crate::label::Label;
use crate::model::Predictor;
use crate::prediction::{self, Prediction};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Empty,
    ImageReady,
    Predicted,
}

/// Everything one session remembers
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    current_image: Option<Bytes>,
    last_prediction: Option<Prediction>,
}

/// A prediction step that failed, with the state it was given back
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PredictionFailed {
    pub state: SessionState,
    pub error: PipelineError,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.current_image, &self.last_prediction) {
            (None, _) => SessionPhase::Empty,
            (Some(_), None) => SessionPhase::ImageReady,
            (Some(_), Some(_)) => SessionPhase::Predicted,
        }
    }

    /// Raw bytes of the submitted image
    pub fn current_image(&self) -> Option<&Bytes> {
        self.current_image.as_ref()
    }

    pub fn last_prediction(&self) -> Option<&Prediction> {
        self.last_prediction.as_ref()
    }

    pub fn predicted_label(&self) -> Option<&Label> {
        self.last_prediction.as_ref().map(|p| &p.label)
    }

    /// Store a new image; valid from every phase
    pub fn submit_image(self, raw: Bytes) -> Self {
        Self {
            current_image: Some(raw),
            last_prediction: None,
        }
    }

    /// Normalize the current image and classify it
    ///
    /// Only `ImageReady` does work. `Empty` has nothing to classify and
    /// `Predicted` already holds the result for this image; both are
    /// returned unchanged. On failure the session stays `ImageReady`.
    pub fn predict(self, predictor: &dyn Predictor) -> Result<Self, PredictionFailed> {
        if self.phase() != SessionPhase::ImageReady {
            return Ok(self);
        }

        let outcome = self
            .current_image
            .as_deref()
            .map(imaging::normalize)
            .unwrap_or_else(|| Err(PipelineError::Decode("no image submitted".to_string())))
            .and_then(|image| prediction::predict(predictor, &image));

        match outcome {
            Ok(prediction) => Ok(Self {
                last_prediction: Some(prediction),
                ..self
            }),
            Err(error) => Err(PredictionFailed { state: self, error }),
        }
    }

    /// Submit and classify in one step
    pub fn submit_and_predict(
        self,
        raw: Bytes,
        predictor: &dyn Predictor,
    ) -> Result<Self, PredictionFailed> {
        self.submit_image(raw).predict(predictor)
    }
}

/// Handle to one session; holding the lock serializes its interactions
pub type SessionHandle = Arc<Mutex<SessionState>>;

struct SessionEntry {
    handle: SessionHandle,
    last_touched: DateTime<Utc>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            handle: Arc::new(Mutex::new(SessionState::new())),
            last_touched: Utc::now(),
        }
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_touched)
            .to_std()
            .unwrap_or_default()
    }
}

/// All live sessions, keyed by id
///
/// Every lookup refreshes the session's last-touched time. Sessions left
/// alone longer than the idle TTL are dropped by `evict_idle`.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.write().await.insert(id, SessionEntry::new());
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_touched = Utc::now();
        Some(Arc::clone(&entry.handle))
    }

    /// Returns false when no such session existed
    pub async fn remove(&self, id: &Uuid) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drop sessions untouched for at least `ttl`; returns how many went
    ///
    /// A session whose lock is held is mid-request and always survives.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.idle_for(now) < ttl || entry.handle.try_lock().is_err();
            if !keep {
                debug!(session_id = %id, "Evicting idle session");
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Periodically evict sessions idle for longer than `ttl`
pub fn spawn_idle_sweep(store: SessionStore, ttl: Duration, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(ttl).await;
            if evicted > 0 {
                let remaining = store.len().await;
                info!(
                    evicted,
                    remaining,
                    "Evicted idle sessions"
                );
            }
        }
    })
}
