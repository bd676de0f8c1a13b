//! Fake collaborators for exercising the pipeline without a real model or network

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lablens_app::content::LabelContentRegistry;
use lablens_app::imaging::CanonicalImage;
use lablens_app::label::Label;
use lablens_app::model::{ArtifactDeserializer, ArtifactFetcher, ModelLoader, Predictor};
use lablens_app::{AppState, PipelineError};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Model file content that `FakeDeserializer` refuses to load
pub const CORRUPT_MODEL: &[u8] = b"corrupt";

/// Predictor with a fixed vocabulary and fixed scores
pub struct FakePredictor {
    labels: Vec<Label>,
    scores: Vec<f32>,
}

impl FakePredictor {
    pub fn new(labels: &[&str], scores: &[f32]) -> Self {
        Self {
            labels: labels.iter().map(|l| Label::from(*l)).collect(),
            scores: scores.to_vec(),
        }
    }

    /// Labels [A, B, C] with scores [0.7, 0.2, 0.1]
    pub fn abc() -> Self {
        Self::new(&["A", "B", "C"], &[0.7, 0.2, 0.1])
    }
}

impl Predictor for FakePredictor {
    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn scores(&self, _image: &CanonicalImage) -> Result<Vec<f32>, PipelineError> {
        Ok(self.scores.clone())
    }
}

/// Fetcher that counts calls and can be slowed down or made to fail
pub struct FakeFetcher {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
    payload: &'static [u8],
}

impl FakeFetcher {
    fn build(delay: Duration, fail: bool, payload: &'static [u8]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail,
            payload,
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::build(Duration::ZERO, false, b"fake model")
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, false, b"fake model")
    }

    pub fn failing() -> Arc<Self> {
        Self::build(Duration::ZERO, true, b"")
    }

    pub fn failing_slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, true, b"")
    }

    /// Serves `payload` as the downloaded artifact
    pub fn serving(payload: &'static [u8]) -> Arc<Self> {
        Self::build(Duration::ZERO, false, payload)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, remote_id: &str) -> Result<Bytes, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(PipelineError::Download(format!("{} unreachable", remote_id)));
        }
        Ok(Bytes::from_static(self.payload))
    }
}

/// Deserializer that rejects `CORRUPT_MODEL` and otherwise yields `FakePredictor::abc`
pub struct FakeDeserializer {
    calls: AtomicUsize,
    settings_error: Option<&'static str>,
}

impl FakeDeserializer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            settings_error: None,
        })
    }

    /// Deserializer whose settings fail validation
    pub fn misconfigured(reason: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            settings_error: Some(reason),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactDeserializer for FakeDeserializer {
    fn validate(&self) -> Result<(), PipelineError> {
        match self.settings_error {
            Some(reason) => Err(PipelineError::Load(reason.to_string())),
            None => Ok(()),
        }
    }

    fn deserialize(&self, path: &Path) -> Result<Arc<dyn Predictor>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = std::fs::read(path).map_err(|e| PipelineError::Load(e.to_string()))?;
        if content == CORRUPT_MODEL {
            return Err(PipelineError::Load("not a model".to_string()));
        }
        Ok(Arc::new(FakePredictor::abc()))
    }
}

pub fn model_path(dir: &Path) -> PathBuf {
    dir.join("cache").join("model.onnx")
}

pub fn loader_with(
    dir: &Path,
    fetcher: Arc<FakeFetcher>,
    deserializer: Arc<FakeDeserializer>,
) -> ModelLoader {
    ModelLoader::new(
        Some("fake-id".to_string()),
        model_path(dir),
        fetcher,
        deserializer,
    )
}

/// App state over fake collaborators and a small registry for label "A"
pub fn app_state(dir: &Path, fetcher: Arc<FakeFetcher>) -> AppState {
    let loader = Arc::new(loader_with(dir, fetcher, FakeDeserializer::new()));
    let registry = LabelContentRegistry::from_toml_str(
        r#"
        [labels.A]
        texts = ["First letter"]
        videos = ["https://youtu.be/LLo8BEHmPs4", "not a video link"]
        "#,
    )
    .unwrap();
    AppState::new(loader, registry, 1024 * 1024)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 120, 200])));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}
