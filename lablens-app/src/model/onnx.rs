//! ONNX predictor backed by tract
//!
//! The model takes one NCHW float tensor (`[1, 3, height, width]`) and
//! returns one score per label.

use super::{ArtifactDeserializer, Predictor};
use crate::error::PipelineError;
use crate::imaging::CanonicalImage;
use crate::label::Label;
use image::imageops::{self, FilterType};
use lablens_common::config::{ModelConfig, OutputKind};
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;

/// Everything needed to turn a model file into a predictor
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxSettings {
    pub labels: Vec<Label>,
    pub input_width: u32,
    pub input_height: u32,
    pub output: OutputKind,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl OnnxSettings {
    /// Build settings from the model config and an already-resolved vocabulary
    pub fn from_config(config: &ModelConfig, labels: Vec<Label>) -> Self {
        Self {
            labels,
            input_width: config.input_width.max(1),
            input_height: config.input_height.max(1),
            output: config.output,
            mean: config.mean.unwrap_or([0.0, 0.0, 0.0]),
            std: config.std.unwrap_or([1.0, 1.0, 1.0]),
        }
    }

    /// Checks that need no model file
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.labels.is_empty() {
            return Err(PipelineError::Load(
                "no label vocabulary configured for the model".to_string(),
            ));
        }
        if self.std.iter().any(|s| *s == 0.0) {
            return Err(PipelineError::Load("std values must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Parse a labels file: one label per line, blank lines ignored
pub fn parse_labels(content: &str) -> Vec<Label> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Label::from)
        .collect()
}

pub struct OnnxPredictor {
    plan: TypedRunnableModel<TypedModel>,
    settings: OnnxSettings,
}

impl OnnxPredictor {
    pub fn load(path: &Path, settings: OnnxSettings) -> Result<Self, PipelineError> {
        settings.validate()?;

        let load_err = |e: TractError| PipelineError::Load(format!("{}: {}", path.display(), e));

        let input_shape = [
            1,
            3,
            settings.input_height as usize,
            settings.input_width as usize,
        ];
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(0, f32::fact(input_shape).into())
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?;

        // When the output shape is static, reject a vocabulary that cannot match it
        if let Some(shape) = model
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.to_vec()))
        {
            let classes: usize = shape.iter().product();
            if classes != settings.labels.len() {
                return Err(PipelineError::Load(format!(
                    "model produces {} scores but {} labels are configured",
                    classes,
                    settings.labels.len()
                )));
            }
        }

        let plan = model.into_runnable().map_err(load_err)?;
        Ok(Self { plan, settings })
    }
}

impl Predictor for OnnxPredictor {
    fn labels(&self) -> &[Label] {
        &self.settings.labels
    }

    fn scores(&self, image: &CanonicalImage) -> Result<Vec<f32>, PipelineError> {
        let input = image_to_tensor(image, &self.settings);

        let outputs = self
            .plan
            .run(tvec!(input.into_tensor().into_tvalue()))
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| PipelineError::Inference("model returned no outputs".to_string()))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .map_err(|e| PipelineError::Inference(e.to_string()))?
            .iter()
            .copied()
            .collect();

        Ok(match self.settings.output {
            OutputKind::Probabilities => scores,
            OutputKind::Logits => softmax(&scores),
        })
    }
}

/// Resize to the model input and lay out as normalized NCHW floats
pub fn image_to_tensor(
    image: &CanonicalImage,
    settings: &OnnxSettings,
) -> tract_ndarray::Array4<f32> {
    let (width, height) = (settings.input_width, settings.input_height);
    let resized = imageops::resize(image.as_rgb(), width, height, FilterType::Triangle);

    tract_ndarray::Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, c, y, x)| {
            let pixel = resized.get_pixel(x as u32, y as u32);
            (pixel[c] as f32 / 255.0 - settings.mean[c]) / settings.std[c]
        },
    )
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Deserializes ONNX files on disk with fixed settings
pub struct OnnxDeserializer {
    settings: OnnxSettings,
}

impl OnnxDeserializer {
    pub fn new(settings: OnnxSettings) -> Self {
        Self { settings }
    }
}

impl ArtifactDeserializer for OnnxDeserializer {
    fn validate(&self) -> Result<(), PipelineError> {
        self.settings.validate()
    }

    fn deserialize(&self, path: &Path) -> Result<Arc<dyn Predictor>, PipelineError> {
        let predictor = OnnxPredictor::load(path, self.settings.clone())?;
        Ok(Arc::new(predictor))
    }
}
