//! Prediction service
//!
//! Runs the predictor on a canonical image, checks that the scores form a
//! probability distribution over the vocabulary, and picks the top label.

use crate::error::PipelineError;
use crate::imaging::CanonicalImage;
use crate::label::Label;
use crate::model::Predictor;
use serde::Serialize;

/// Allowed distance of the probability sum from 1.0
pub const SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelProbability {
    pub label: Label,
    pub probability: f32,
}

/// One probability per vocabulary label, in vocabulary order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProbabilityDistribution(Vec<LabelProbability>);

/// A distribution entry prepared for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedLabel {
    pub label: Label,
    pub percentage: f64,
    /// Two-decimal percentage, e.g. "70.00%"
    pub display: String,
}

impl ProbabilityDistribution {
    pub fn entries(&self) -> &[LabelProbability] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn probability_of(&self, label: &str) -> Option<f32> {
        self.0
            .iter()
            .find(|entry| entry.label.as_str() == label)
            .map(|entry| entry.probability)
    }

    /// Entries by descending probability; equal probabilities keep vocabulary order
    pub fn ranked(&self) -> Vec<RankedLabel> {
        let mut sorted: Vec<&LabelProbability> = self.0.iter().collect();
        sorted.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        sorted
            .into_iter()
            .map(|entry| {
                let percentage = f64::from(entry.probability) * 100.0;
                RankedLabel {
                    label: entry.label.clone(),
                    percentage,
                    display: format!("{:.2}%", percentage),
                }
            })
            .collect()
    }
}

/// Outcome of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: Label,
    pub distribution: ProbabilityDistribution,
}

/// Classify an image
///
/// The predicted label is the highest-probability entry; ties go to the
/// label that comes first in the vocabulary.
pub fn predict(
    predictor: &dyn Predictor,
    image: &CanonicalImage,
) -> Result<Prediction, PipelineError> {
    let labels = predictor.labels();
    if labels.is_empty() {
        return Err(PipelineError::Inference("predictor has no labels".to_string()));
    }

    let scores = predictor.scores(image)?;
    validate(&scores, labels.len())?;

    let mut best = 0;
    for (i, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = i;
        }
    }

    let distribution = ProbabilityDistribution(
        labels
            .iter()
            .zip(scores)
            .map(|(label, probability)| LabelProbability {
                label: label.clone(),
                probability,
            })
            .collect(),
    );

    Ok(Prediction {
        label: labels[best].clone(),
        distribution,
    })
}

fn validate(scores: &[f32], expected: usize) -> Result<(), PipelineError> {
    if scores.len() != expected {
        return Err(PipelineError::Inference(format!(
            "predictor returned {} scores for {} labels",
            scores.len(),
            expected
        )));
    }

    if let Some(bad) = scores
        .iter()
        .find(|p| !p.is_finite() || !(0.0..=1.0).contains(*p))
    {
        return Err(PipelineError::Inference(format!(
            "score {} is not a probability",
            bad
        )));
    }

    let sum: f32 = scores.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(PipelineError::Inference(format!(
            "scores sum to {} instead of 1",
            sum
        )));
    }

    Ok(())
}
