//! Linear model with a logistic confidence.
//!
//! `growth = (intercept + Σ weight·feature) / (1 + alpha)` over the features
//! present in the snapshot. Confidence is the logistic probability of the
//! predicted direction, `max(p, 1 - p)` with `p = σ(growth / temperature)`,
//! scaled by feature completeness.

use std::collections::BTreeMap;

use super::features::{self, FeatureVector};
use super::{PredictError, Prediction, Predictor};
use crate::domain::ModelKind;
use crate::registry::{ParamError, TunedParameters};

#[derive(Debug, Clone)]
pub struct LinearModel {
    kind: ModelKind,
}

impl LinearModel {
    pub fn new(tag: &str) -> Self {
        Self { kind: ModelKind::new(tag) }
    }

    fn default_weights() -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            (features::REVENUE_YOY, 0.5),
            (features::REVENUE_YOY_3M, 0.3),
            (features::REVENUE_MOM, 0.1),
            (features::EPS_GROWTH, 0.1),
        ])
    }

    fn weights(params: &TunedParameters) -> Result<Vec<(String, f64)>, PredictError> {
        let Some(table) = params.map("weights")? else {
            return Ok(Self::default_weights()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect());
        };
        let mut out = Vec::with_capacity(table.len());
        for (name, value) in table {
            if !FeatureVector::is_known(name) {
                return Err(ParamError::OutOfRange {
                    name: "weights".to_string(),
                    detail: format!("unknown feature '{name}'"),
                }
                .into());
            }
            let w = value.as_f64().ok_or_else(|| ParamError::InvalidType {
                name: format!("weights.{name}"),
                expected: "a number",
                found: value.to_string(),
            })?;
            out.push((name.clone(), w));
        }
        Ok(out)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Predictor for LinearModel {
    fn kind(&self) -> ModelKind {
        self.kind.clone()
    }

    fn predict(
        &self,
        features: &FeatureVector,
        params: &TunedParameters,
    ) -> Result<Prediction, PredictError> {
        let intercept = params.f64_or("intercept", 0.0)?;
        let alpha = params.f64_or("alpha", 0.0)?;
        let temperature = params.f64_or("temperature", 0.1)?;
        params.require_range("alpha", alpha, 0.0, f64::MAX)?;
        params.require_range("temperature", temperature, f64::EPSILON, f64::MAX)?;

        let weights = Self::weights(params)?;
        let mut used = 0;
        let mut sum = intercept;
        for (name, w) in &weights {
            if let Some(x) = features.get(name) {
                sum += w * x;
                used += 1;
            }
        }
        if used == 0 {
            return Err(PredictError::InsufficientFeatures(
                "none of the weighted features are available".to_string(),
            ));
        }

        let growth = sum / (1.0 + alpha);
        let p_up = sigmoid(growth / temperature);
        let confidence = features.completeness() * p_up.max(1.0 - p_up);
        Prediction::bounded(growth, confidence)
    }
}
