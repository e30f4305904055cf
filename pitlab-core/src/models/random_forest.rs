//! Bagged ensemble over the year-over-year revenue growth history.
//!
//! Each tree draws a bootstrap sample of the growth history and estimates the
//! next growth rate as a recency-weighted mean of its sample; deeper trees
//! weight recent observations more heavily. The forest predicts the mean
//! estimate and derives certainty from the spread between trees.

use rand::Rng;

use super::features::{mean, std_dev, FeatureVector};
use super::{certainty_from_dispersion, PredictError, Prediction, Predictor};
use crate::domain::ModelKind;
use crate::registry::TunedParameters;
use crate::rng::RngHierarchy;

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomForest;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ForestParams {
    n_estimators: usize,
    max_depth: usize,
    max_samples: f64,
    min_samples_leaf: usize,
    random_state: u64,
    dispersion_scale: f64,
}

impl ForestParams {
    fn from_tuned(params: &TunedParameters) -> Result<Self, PredictError> {
        let n_estimators = params.usize_or("n_estimators", 100)?;
        let max_depth = params.usize_or("max_depth", 10)?;
        let max_samples = params.f64_or("max_samples", 0.8)?;
        let min_samples_leaf = params.usize_or("min_samples_leaf", 1)?;
        let dispersion_scale = params.f64_or("dispersion_scale", 0.1)?;
        params.require_range("n_estimators", n_estimators as f64, 1.0, 5_000.0)?;
        params.require_range("max_depth", max_depth as f64, 1.0, 1_000.0)?;
        params.require_range("max_samples", max_samples, f64::EPSILON, 1.0)?;
        params.require_range("dispersion_scale", dispersion_scale, f64::EPSILON, f64::MAX)?;
        Ok(Self {
            n_estimators,
            max_depth,
            max_samples,
            min_samples_leaf: min_samples_leaf.max(1),
            random_state: params.u64_or("random_state", 42)?,
            dispersion_scale,
        })
    }
}

impl RandomForest {
    /// One tree: bootstrap indices, recency-weighted mean of the drawn values.
    fn tree_estimate<R: Rng>(history: &[f64], p: &ForestParams, rng: &mut R) -> f64 {
        let n = history.len();
        let draws = ((p.max_samples * n as f64).ceil() as usize).max(1);
        let decay = 1.0 - 1.0 / (p.max_depth as f64 + 1.0);

        // A leaf needs at least `min_samples_leaf` draws; smaller samples fall back
        // to the whole history.
        let indices: Vec<usize> = if draws < p.min_samples_leaf {
            (0..n).collect()
        } else {
            (0..draws).map(|_| rng.gen_range(0..n)).collect()
        };

        let mut weighted = 0.0;
        let mut total = 0.0;
        for i in indices {
            let age = (n - 1 - i) as i32;
            let w = decay.powi(age);
            weighted += w * history[i];
            total += w;
        }
        if total > 0.0 {
            weighted / total
        } else {
            mean(history)
        }
    }
}

impl Predictor for RandomForest {
    fn kind(&self) -> ModelKind {
        ModelKind::new("random_forest")
    }

    fn predict(
        &self,
        features: &FeatureVector,
        params: &TunedParameters,
    ) -> Result<Prediction, PredictError> {
        let p = ForestParams::from_tuned(params)?;
        let history = &features.yoy_history;
        if history.is_empty() {
            return Err(PredictError::InsufficientFeatures(
                "no year-over-year revenue growth available".to_string(),
            ));
        }

        let seeds = RngHierarchy::new(p.random_state);
        let mut rng = seeds.rng_for(&features.equity_id, features.as_of, 0);
        let estimates: Vec<f64> =
            (0..p.n_estimators).map(|_| Self::tree_estimate(history, &p, &mut rng)).collect();

        let growth = mean(&estimates);
        let spread = std_dev(&estimates);
        let confidence =
            features.completeness() * certainty_from_dispersion(spread, p.dispersion_scale);
        Prediction::bounded(growth, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::features::fixtures::growing_snapshot;

    fn features(months: u32, growth: f64) -> FeatureVector {
        FeatureVector::from_snapshot(&growing_snapshot(months, growth))
    }

    #[test]
    fn constant_growth_history_is_certain() {
        let fv = features(30, 0.01);
        let p = RandomForest.predict(&fv, &TunedParameters::default()).unwrap();
        let expected = 1.01f64.powi(12) - 1.0;
        assert!((p.growth_rate - expected).abs() < 1e-9, "{p:?}");
        assert!((p.confidence - fv.completeness()).abs() < 1e-6, "{p:?}");
    }

    #[test]
    fn random_state_changes_nothing_for_constant_history() {
        let fv = features(30, 0.01);
        let a = RandomForest.predict(&fv, &TunedParameters::parse("{'random_state': 1}").unwrap());
        let b = RandomForest.predict(&fv, &TunedParameters::parse("{'random_state': 2}").unwrap());
        assert!((a.unwrap().growth_rate - b.unwrap().growth_rate).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_prediction() {
        let fv = features(30, 0.02);
        let params = TunedParameters::parse("{'n_estimators': 25, 'max_samples': 0.5}").unwrap();
        assert_eq!(RandomForest.predict(&fv, &params), RandomForest.predict(&fv, &params));
    }

    #[test]
    fn needs_year_over_year_history() {
        let fv = features(6, 0.01);
        let err = RandomForest.predict(&fv, &TunedParameters::default()).unwrap_err();
        assert!(matches!(err, PredictError::InsufficientFeatures(_)));
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let fv = features(30, 0.01);
        for literal in ["{'n_estimators': 0}", "{'max_samples': 1.5}", "{'max_depth': 'deep'}"] {
            let params = TunedParameters::parse(literal).unwrap();
            let err = RandomForest.predict(&fv, &params).unwrap_err();
            assert!(matches!(err, PredictError::InvalidParameters(_)), "{literal}: {err}");
        }
    }
}
