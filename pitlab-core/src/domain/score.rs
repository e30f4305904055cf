//! Scoring outcomes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::EquityId;

/// Open tag naming a family of predictors, e.g. `random_forest`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ModelKind(String);

impl ModelKind {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ModelKind {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ModelKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ModelKind> for String {
    fn from(k: ModelKind) -> Self {
        k.0
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an equity could not be scored. Always recoverable: the equity is
/// dropped for the period and the reason is reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ScoreFailure {
    /// No tuned parameters for this (equity, model kind).
    ParametersMissing,
    /// Not enough published history as of the scoring date.
    InsufficientHistory { available: usize, required: usize },
    /// The tuned parameters exist but cannot drive the model.
    InvalidParameters { detail: String },
    /// The model produced no usable number.
    ModelFailure { detail: String },
    /// The data store could not be reached after retries.
    AccessorUnavailable { detail: String },
}

impl fmt::Display for ScoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParametersMissing => write!(f, "parameters missing"),
            Self::InsufficientHistory { available, required } => {
                write!(f, "insufficient history ({available} of {required} periods)")
            }
            Self::InvalidParameters { detail } => write!(f, "invalid parameters: {detail}"),
            Self::ModelFailure { detail } => write!(f, "model failure: {detail}"),
            Self::AccessorUnavailable { detail } => write!(f, "accessor unavailable: {detail}"),
        }
    }
}

/// Score for one equity at one as-of date under one model kind.
///
/// `growth_rate` is a fraction (0.05 = +5%). `confidence` is a calibrated
/// probability in `[0, 1]`. Both are zero when `failure` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub equity_id: EquityId,
    pub as_of: NaiveDate,
    pub model_kind: ModelKind,
    pub growth_rate: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScoreFailure>,
}

impl ScoreResult {
    pub fn scored(
        equity_id: EquityId,
        as_of: NaiveDate,
        model_kind: ModelKind,
        growth_rate: f64,
        confidence: f64,
    ) -> Self {
        Self { equity_id, as_of, model_kind, growth_rate, confidence, failure: None }
    }

    pub fn failed(
        equity_id: EquityId,
        as_of: NaiveDate,
        model_kind: ModelKind,
        failure: ScoreFailure,
    ) -> Self {
        Self {
            equity_id,
            as_of,
            model_kind,
            growth_rate: 0.0,
            confidence: 0.0,
            failure: Some(failure),
        }
    }

    pub fn is_scored(&self) -> bool {
        self.failure.is_none()
    }
}
