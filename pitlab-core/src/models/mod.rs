//! Predictors: one per model kind, selected by tag.
//!
//! Every predictor is a pure function of a [`FeatureVector`] and the tuned
//! parameters for that equity. Randomized models draw from an
//! [`RngHierarchy`](crate::rng::RngHierarchy) seeded by their `random_state`
//! parameter and the (equity, as-of) pair, so scores are reproducible.
//!
//! Confidence is a calibrated probability in `[0, 1]`: the model's own
//! certainty scaled by the share of features the snapshot could supply.

pub mod features;
pub mod gradient_boosted;
pub mod linear;
pub mod random_forest;

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::ModelKind;
use crate::registry::{ParamError, TunedParameters};
pub use features::FeatureVector;
pub use gradient_boosted::GradientBoosted;
pub use linear::LinearModel;
pub use random_forest::RandomForest;

/// Lowest growth a prediction can report: a total loss.
pub const MIN_GROWTH: f64 = -1.0;
/// Highest growth a prediction can report.
pub const MAX_GROWTH: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error(transparent)]
    InvalidParameters(#[from] ParamError),

    #[error("insufficient features: {0}")]
    InsufficientFeatures(String),

    #[error("model produced a non-finite value")]
    NonFinite,
}

/// A model's output for one equity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Expected forward growth as a fraction.
    pub growth_rate: f64,
    /// Calibrated probability in `[0, 1]`.
    pub confidence: f64,
}

impl Prediction {
    /// Clamp growth into the reportable range and confidence into `[0, 1]`.
    pub fn bounded(growth_rate: f64, confidence: f64) -> Result<Self, PredictError> {
        if !growth_rate.is_finite() || !confidence.is_finite() {
            return Err(PredictError::NonFinite);
        }
        Ok(Self {
            growth_rate: growth_rate.clamp(MIN_GROWTH, MAX_GROWTH),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

/// Capability every model kind implements.
pub trait Predictor: Send + Sync {
    /// The tag this predictor answers to.
    fn kind(&self) -> ModelKind;

    fn predict(
        &self,
        features: &FeatureVector,
        params: &TunedParameters,
    ) -> Result<Prediction, PredictError>;
}

/// Certainty from a dispersion measure: 1 at zero spread, decaying with `scale`.
pub(crate) fn certainty_from_dispersion(dispersion: f64, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 0.0;
    }
    (-dispersion.abs() / scale).exp()
}

/// Registered predictors keyed by tag.
#[derive(Clone, Default)]
pub struct ModelSet {
    predictors: BTreeMap<ModelKind, Arc<dyn Predictor>>,
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.predictors.keys()).finish()
    }
}

impl ModelSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in kinds: `random_forest`, `xgboost`, `lightgbm`, `linear`
    /// and its `logistic` alias.
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(Arc::new(RandomForest));
        set.register(Arc::new(GradientBoosted::new("xgboost")));
        set.register(Arc::new(GradientBoosted::new("lightgbm")));
        set.register(Arc::new(LinearModel::new("linear")));
        set.register(Arc::new(LinearModel::new("logistic")));
        set
    }

    /// Add or replace the predictor for its kind.
    pub fn register(&mut self, predictor: Arc<dyn Predictor>) {
        self.predictors.insert(predictor.kind(), predictor);
    }

    pub fn get(&self, kind: &ModelKind) -> Option<&dyn Predictor> {
        self.predictors.get(kind).map(|p| p.as_ref())
    }

    pub fn contains(&self, kind: &ModelKind) -> bool {
        self.predictors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ModelKind> {
        self.predictors.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::features::fixtures::growing_snapshot;
    use super::*;

    #[test]
    fn standard_set_has_every_kind() {
        let set = ModelSet::standard();
        for tag in ["random_forest", "xgboost", "lightgbm", "linear", "logistic"] {
            assert!(set.contains(&ModelKind::new(tag)), "{tag}");
        }
        assert!(!set.contains(&ModelKind::new("svm")));
    }

    #[test]
    fn every_standard_model_is_deterministic_and_bounded() {
        let set = ModelSet::standard();
        let fv = FeatureVector::from_snapshot(&growing_snapshot(30, 0.015));
        let params = TunedParameters::default();
        for kind in set.kinds() {
            let model = set.get(kind).unwrap();
            let a = model.predict(&fv, &params).unwrap();
            let b = model.predict(&fv, &params).unwrap();
            assert_eq!(a, b, "{kind}");
            assert!((0.0..=1.0).contains(&a.confidence), "{kind}: {a:?}");
            assert!(a.growth_rate > 0.0, "{kind}: growing revenue should score positive, {a:?}");
        }
    }

    #[test]
    fn bounded_rejects_nan_and_clamps() {
        assert_eq!(Prediction::bounded(f64::NAN, 0.5), Err(PredictError::NonFinite));
        let p = Prediction::bounded(50.0, 1.5).unwrap();
        assert_eq!(p.growth_rate, MAX_GROWTH);
        assert_eq!(p.confidence, 1.0);
    }

    #[test]
    fn certainty_decays_with_dispersion() {
        assert_eq!(certainty_from_dispersion(0.0, 0.1), 1.0);
        assert!(certainty_from_dispersion(0.2, 0.1) < certainty_from_dispersion(0.1, 0.1));
    }
}
