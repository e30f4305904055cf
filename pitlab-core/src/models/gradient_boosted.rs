//! Additive stagewise model over the growth signals.
//!
//! Starts from the median year-over-year growth and, stage by stage, fits the
//! residual against each growth signal in turn, shrunk by the learning rate,
//! the row subsample fraction and L2 regularization. Certainty comes from how
//! far the signals still disagree with the fitted value.

use super::features::{mean, FeatureVector};
use super::{certainty_from_dispersion, PredictError, Prediction, Predictor};
use crate::domain::ModelKind;
use crate::registry::TunedParameters;

/// Serves both `xgboost` and `lightgbm` tags; the tag only picks which tuned
/// parameters are read.
#[derive(Debug, Clone)]
pub struct GradientBoosted {
    kind: ModelKind,
}

impl GradientBoosted {
    pub fn new(tag: &str) -> Self {
        Self { kind: ModelKind::new(tag) }
    }
}

#[derive(Debug, Clone, Copy)]
struct BoostParams {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: usize,
    subsample: f64,
    reg_lambda: f64,
    dispersion_scale: f64,
}

impl BoostParams {
    fn from_tuned(params: &TunedParameters) -> Result<Self, PredictError> {
        let p = Self {
            n_estimators: params.usize_or("n_estimators", 100)?,
            learning_rate: params.f64_or("learning_rate", 0.1)?,
            max_depth: params.usize_or("max_depth", 6)?,
            subsample: params.f64_or("subsample", 0.8)?,
            reg_lambda: params.f64_or("reg_lambda", 1.0)?,
            dispersion_scale: params.f64_or("dispersion_scale", 0.1)?,
        };
        params.require_range("n_estimators", p.n_estimators as f64, 1.0, 10_000.0)?;
        params.require_range("learning_rate", p.learning_rate, f64::EPSILON, 1.0)?;
        params.require_range("max_depth", p.max_depth as f64, 1.0, 1_000.0)?;
        params.require_range("subsample", p.subsample, f64::EPSILON, 1.0)?;
        params.require_range("reg_lambda", p.reg_lambda, 0.0, f64::MAX)?;
        params.require_range("dispersion_scale", p.dispersion_scale, f64::EPSILON, f64::MAX)?;
        Ok(p)
    }
}

fn median(xs: &[f64]) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

impl Predictor for GradientBoosted {
    fn kind(&self) -> ModelKind {
        self.kind.clone()
    }

    fn predict(
        &self,
        features: &FeatureVector,
        params: &TunedParameters,
    ) -> Result<Prediction, PredictError> {
        let p = BoostParams::from_tuned(params)?;
        let targets = features.growth_signals();
        if targets.is_empty() {
            return Err(PredictError::InsufficientFeatures(
                "no growth signals available".to_string(),
            ));
        }

        let mut fitted = if features.yoy_history.is_empty() {
            mean(&targets)
        } else {
            median(&features.yoy_history)
        };
        let leaf_shrink = p.max_depth as f64 / (p.max_depth as f64 + p.reg_lambda);
        let step = p.learning_rate * p.subsample * leaf_shrink;
        for stage in 0..p.n_estimators {
            let residual = targets[stage % targets.len()] - fitted;
            fitted += step * residual;
        }

        let rmse = (targets.iter().map(|t| (t - fitted).powi(2)).sum::<f64>()
            / targets.len() as f64)
            .sqrt();
        let confidence =
            features.completeness() * certainty_from_dispersion(rmse, p.dispersion_scale);
        Prediction::bounded(fitted, confidence)
    }
}
