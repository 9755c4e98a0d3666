//! Logistic-regression CTR model.
//!
//! A model is either [`CtrModel::Untrained`] (no weights yet, callers must
//! fall back to a heuristic) or [`CtrModel::Trained`]. Trained weights are
//! never mutated: training always yields a new [`TrainedModel`].

use adselect_core::config::TrainingConfig;
use adselect_core::types::{FeatureVector, TrainingExample};
use adselect_core::{EngineError, EngineResult};
use ndarray::{s, Array1, ArrayView1};
use serde::Serialize;
use tracing::debug;

/// Overflow-safe logistic function.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainingParams {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for TrainingParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            learning_rate: config.learning_rate,
        }
    }
}

/// Fit statistics recorded when a model is trained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub examples: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Training-set accuracy at a 0.5 threshold.
    pub accuracy: f64,
    /// Mean training-set cross-entropy.
    pub log_loss: f64,
}

/// Immutable logistic-regression weights, bias at index 0.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    weights: Array1<f64>,
    summary: Option<TrainingSummary>,
}

impl TrainedModel {
    /// Fit weights by per-example gradient steps on the logistic loss.
    ///
    /// Deterministic for a given example order and parameters.
    pub fn train(examples: &[TrainingExample], params: &TrainingParams) -> EngineResult<Self> {
        let first = examples.first().ok_or(EngineError::InsufficientData {
            required: 1,
            got: 0,
        })?;
        let arity = first.features.len();

        for (i, example) in examples.iter().enumerate() {
            if example.features.len() != arity {
                return Err(EngineError::DimensionMismatch {
                    expected: arity,
                    got: example.features.len(),
                });
            }
            if !example.features.is_finite() {
                return Err(EngineError::NumericInstability(format!(
                    "example {i} has non-finite features"
                )));
            }
        }

        let rows: Vec<ArrayView1<f64>> = examples
            .iter()
            .map(|e| ArrayView1::from(e.features.as_slice()))
            .collect();
        let mut weights = Array1::<f64>::zeros(arity + 1);

        for _ in 0..params.epochs {
            for (x, example) in rows.iter().zip(examples) {
                let p = sigmoid(linear(&weights, x));
                let step = params.learning_rate * (example.label() - p);
                weights[0] += step;
                weights.slice_mut(s![1..]).scaled_add(step, x);
            }
        }

        if let Some((i, w)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite()) {
            return Err(EngineError::NumericInstability(format!(
                "weight {i} is {w} after {} epochs",
                params.epochs
            )));
        }

        let summary = summarize(&weights, &rows, examples, params);
        debug!(
            examples = summary.examples,
            accuracy = summary.accuracy,
            log_loss = summary.log_loss,
            "CTR model trained"
        );

        Ok(Self {
            weights,
            summary: Some(summary),
        })
    }

    /// Wrap externally supplied weights (bias first).
    pub fn from_weights(weights: Vec<f64>) -> EngineResult<Self> {
        if weights.len() < 2 {
            return Err(EngineError::DimensionMismatch {
                expected: 2,
                got: weights.len(),
            });
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(EngineError::NumericInstability(
                "supplied weights contain non-finite values".to_string(),
            ));
        }
        Ok(Self {
            weights: Array1::from(weights),
            summary: None,
        })
    }

    pub fn predict(&self, features: &FeatureVector) -> EngineResult<f64> {
        self.check_arity(features)?;
        Ok(sigmoid(linear(
            &self.weights,
            &ArrayView1::from(features.as_slice()),
        )))
    }

    /// Number of features, excluding the bias.
    pub fn feature_arity(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn summary(&self) -> Option<&TrainingSummary> {
        self.summary.as_ref()
    }

    fn check_arity(&self, features: &FeatureVector) -> EngineResult<()> {
        if features.len() != self.feature_arity() {
            return Err(EngineError::DimensionMismatch {
                expected: self.feature_arity(),
                got: features.len(),
            });
        }
        Ok(())
    }
}

fn linear(weights: &Array1<f64>, x: &ArrayView1<f64>) -> f64 {
    let z = weights[0] + weights.slice(s![1..]).dot(x);
    if !z.is_nan() {
        return z;
    }
    // Opposite-signed terms overflowed to +inf and -inf. With each term
    // saturated the sum is finite or +-inf, never NaN.
    weights[0]
        + weights
            .slice(s![1..])
            .iter()
            .zip(x.iter())
            .map(|(w, v)| (w * v).clamp(-f64::MAX, f64::MAX))
            .sum::<f64>()
}

fn summarize(
    weights: &Array1<f64>,
    rows: &[ArrayView1<f64>],
    examples: &[TrainingExample],
    params: &TrainingParams,
) -> TrainingSummary {
    let mut correct = 0usize;
    let mut loss = 0.0;
    for (x, example) in rows.iter().zip(examples) {
        let p = sigmoid(linear(weights, x));
        if (p >= 0.5) == example.clicked {
            correct += 1;
        }
        let p = p.clamp(1e-15, 1.0 - 1e-15);
        let y = example.label();
        loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
    }
    let n = examples.len() as f64;
    TrainingSummary {
        examples: examples.len(),
        epochs: params.epochs,
        learning_rate: params.learning_rate,
        accuracy: correct as f64 / n,
        log_loss: loss / n,
    }
}

/// Outcome of asking a [`CtrModel`] for a prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prediction {
    /// No weights yet; the caller must substitute its fallback.
    Untrained,
    Ctr(f64),
}

#[derive(Debug, Clone)]
pub enum CtrModel {
    Untrained { feature_arity: usize },
    Trained(TrainedModel),
}

impl CtrModel {
    pub fn untrained(feature_arity: usize) -> Self {
        CtrModel::Untrained { feature_arity }
    }

    /// Score one feature vector. Arity is checked in both states so a
    /// misconfigured extractor fails before the first model is trained.
    pub fn predict(&self, features: &FeatureVector) -> EngineResult<Prediction> {
        match self {
            CtrModel::Untrained { feature_arity } => {
                if features.len() != *feature_arity {
                    return Err(EngineError::DimensionMismatch {
                        expected: *feature_arity,
                        got: features.len(),
                    });
                }
                Ok(Prediction::Untrained)
            }
            CtrModel::Trained(model) => model.predict(features).map(Prediction::Ctr),
        }
    }

    pub fn feature_arity(&self) -> usize {
        match self {
            CtrModel::Untrained { feature_arity } => *feature_arity,
            CtrModel::Trained(model) => model.feature_arity(),
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, CtrModel::Trained(_))
    }
}
