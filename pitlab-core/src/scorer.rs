//! Per-equity scoring: registry lookup, snapshot, model, confidence.
//!
//! Failures never escape as errors. Each one becomes a [`ScoreFailure`] on the
//! returned [`ScoreResult`] so the caller can drop the equity for the period
//! and report why.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::accessor::{Accessor, AccessorError};
use crate::domain::{EquityId, ModelKind, ScoreFailure, ScoreResult};
use crate::models::{FeatureVector, ModelSet, PredictError};
use crate::registry::ParameterRegistry;

/// Which model kind scores an equity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelSelection {
    /// The same kind for every equity.
    Fixed { kind: ModelKind },
    /// Each equity's best-scoring tuned kind.
    BestScoring,
}

impl ModelSelection {
    pub fn fixed(kind: impl Into<ModelKind>) -> Self {
        Self::Fixed { kind: kind.into() }
    }

    /// Label used in results when no concrete kind applies.
    pub fn label(&self) -> ModelKind {
        match self {
            Self::Fixed { kind } => kind.clone(),
            Self::BestScoring => ModelKind::new("best"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerOptions {
    /// Monthly revenue periods required before an equity can be scored.
    /// Never below one prior reporting period.
    pub min_reporting_periods: usize,
}

impl Default for ScorerOptions {
    fn default() -> Self {
        // current month plus the same month a year earlier
        Self { min_reporting_periods: 13 }
    }
}

/// Scores equities for one model selection.
#[derive(Debug, Clone)]
pub struct Scorer {
    registry: Arc<ParameterRegistry>,
    accessor: Arc<Accessor>,
    models: Arc<ModelSet>,
    selection: ModelSelection,
    options: ScorerOptions,
}

impl Scorer {
    pub fn new(
        registry: Arc<ParameterRegistry>,
        accessor: Arc<Accessor>,
        models: Arc<ModelSet>,
        selection: ModelSelection,
        options: ScorerOptions,
    ) -> Self {
        let options =
            ScorerOptions { min_reporting_periods: options.min_reporting_periods.max(1) };
        Self { registry, accessor, models, selection, options }
    }

    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    pub fn score(&self, equity_id: &EquityId, as_of: NaiveDate) -> ScoreResult {
        let result = self.score_inner(equity_id, as_of);
        match &result.failure {
            None => debug!(
                equity = %equity_id,
                %as_of,
                kind = %result.model_kind,
                growth = result.growth_rate,
                confidence = result.confidence,
                "scored"
            ),
            Some(reason) => debug!(equity = %equity_id, %as_of, %reason, "not scored"),
        }
        result
    }

    fn score_inner(&self, equity_id: &EquityId, as_of: NaiveDate) -> ScoreResult {
        let fail = |kind: ModelKind, failure: ScoreFailure| {
            ScoreResult::failed(equity_id.clone(), as_of, kind, failure)
        };

        let kind = match &self.selection {
            ModelSelection::Fixed { kind } => kind.clone(),
            ModelSelection::BestScoring => match self.registry.best_kind_for(equity_id) {
                Some(kind) => kind.clone(),
                None => return fail(self.selection.label(), ScoreFailure::ParametersMissing),
            },
        };

        let params = match self.registry.lookup(equity_id, &kind) {
            Ok(params) => params,
            Err(_) => return fail(kind, ScoreFailure::ParametersMissing),
        };

        let required = self.options.min_reporting_periods;
        let snapshot = match self.accessor.snapshot(equity_id, as_of) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return fail(kind, ScoreFailure::InsufficientHistory { available: 0, required })
            }
            Err(e) => return fail(kind, accessor_failure(&e)),
        };
        let available = snapshot.reporting_periods();
        if available < required {
            return fail(kind, ScoreFailure::InsufficientHistory { available, required });
        }

        let Some(predictor) = self.models.get(&kind) else {
            let detail = format!("no predictor for model kind '{kind}'");
            return fail(kind.clone(), ScoreFailure::ModelFailure { detail });
        };

        let features = FeatureVector::from_snapshot(&snapshot);
        match predictor.predict(&features, params) {
            Ok(p) => {
                ScoreResult::scored(equity_id.clone(), as_of, kind, p.growth_rate, p.confidence)
            }
            Err(PredictError::InvalidParameters(e)) => {
                fail(kind, ScoreFailure::InvalidParameters { detail: e.to_string() })
            }
            Err(PredictError::InsufficientFeatures(detail)) => {
                debug!(equity = %equity_id, %as_of, %detail, "predictor lacks features");
                fail(kind, ScoreFailure::InsufficientHistory { available, required })
            }
            Err(e @ PredictError::NonFinite) => {
                fail(kind, ScoreFailure::ModelFailure { detail: e.to_string() })
            }
        }
    }
}

fn accessor_failure(e: &AccessorError) -> ScoreFailure {
    ScoreFailure::AccessorUnavailable { detail: e.to_string() }
}
