//! Model loading and the predictor abstraction

pub mod loader;
pub mod onnx;

pub use loader::{ArtifactDeserializer, ArtifactFetcher, HttpFetcher, ModelLoader, ModelStatus};
pub use onnx::{OnnxDeserializer, OnnxPredictor, OnnxSettings};

use crate::error::PipelineError;
use crate::imaging::CanonicalImage;
use crate::label::Label;

/// A loaded, immutable classifier
///
/// Shared by every session as `Arc<dyn Predictor>`; implementations must be
/// safe to call concurrently.
pub trait Predictor: Send + Sync {
    /// Label vocabulary, in the same order as `scores` output
    fn labels(&self) -> &[Label];

    /// One score per label for the given image
    fn scores(&self, image: &CanonicalImage) -> Result<Vec<f32>, PipelineError>;
}
