//! Serializable simulation configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! [backtest]
//! start = "2022-01-01"
//! end = "2023-12-31"
//! model = "random_forest"      # or { best = true }
//!
//! [selection]
//! top_k = 10                   # or threshold = 0.05
//! ```
//!
//! Every section has defaults; [`SimulationConfig::validate`] rejects
//! inconsistent combinations before any period runs.

use chrono::NaiveDate;
use pitlab_core::accessor::AccessorOptions;
use pitlab_core::domain::{EquityId, ModelKind};
use pitlab_core::pool::{JsonEncoding, PoolCriteria};
use pitlab_core::scorer::{ModelSelection, ScorerOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::calendar::RebalanceFrequency;
use crate::selection::{SelectionPolicy, WeightingPolicy};

/// Unique identifier for a simulation run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete configuration for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub backtest: BacktestSection,
    #[serde(default)]
    pub selection: SelectionSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub scoring: ScoringSection,
    #[serde(default)]
    pub accessor: AccessorOptions,
    #[serde(default)]
    pub costs: CostSection,
    #[serde(default)]
    pub paths: PathSection,
}

/// Model selection as written in the config: a kind tag or `{ best = true }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelChoice {
    Kind(ModelKind),
    Best { best: bool },
}

impl ModelChoice {
    pub fn to_selection(&self) -> ModelSelection {
        match self {
            Self::Kind(kind) => ModelSelection::Fixed { kind: kind.clone() },
            Self::Best { .. } => ModelSelection::BestScoring,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default)]
    pub rebalance: RebalanceFrequency,
    pub model: ModelChoice,
    /// Calendar and benchmark equity, e.g. a broad-market fund.
    #[serde(default)]
    pub benchmark: Option<EquityId>,
    /// Oldest close accepted as the price on a decision or exit date.
    #[serde(default = "default_staleness")]
    pub max_price_staleness_days: i64,
}

fn default_capital() -> f64 {
    1_000_000.0
}

fn default_staleness() -> i64 {
    7
}

/// Exactly one of `top_k` and `threshold` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSection {
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Cap on positions under threshold selection.
    #[serde(default)]
    pub max_positions: Option<usize>,
    #[serde(default)]
    pub weighting: WeightingPolicy,
    #[serde(default)]
    pub max_single_weight: Option<f64>,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            top_k: Some(10),
            threshold: None,
            max_positions: None,
            weighting: WeightingPolicy::Equal,
            max_single_weight: None,
        }
    }
}

impl SelectionSection {
    pub fn policy(&self) -> Result<SelectionPolicy, ConfigError> {
        match (self.top_k, self.threshold) {
            (Some(k), None) => Ok(SelectionPolicy::TopK { k }),
            (None, Some(min_growth)) => {
                Ok(SelectionPolicy::Threshold { min_growth, max_positions: self.max_positions })
            }
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "selection.top_k and selection.threshold are mutually exclusive".into(),
            )),
            (None, None) => Err(ConfigError::Invalid(
                "selection needs either top_k or threshold".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolSection {
    #[serde(default)]
    pub criteria: PoolCriteria,
    /// Use this artifact for every period instead of building pools.
    #[serde(default)]
    pub fixed: Option<PathBuf>,
    /// Persist per-period pools here and reuse them on later runs.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    #[serde(default)]
    pub rebuild: bool,
    #[serde(default)]
    pub encoding: JsonEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSection {
    #[serde(default = "default_min_periods")]
    pub min_reporting_periods: usize,
    /// Scoring worker threads; `0` uses the global rayon pool.
    #[serde(default)]
    pub threads: usize,
}

fn default_min_periods() -> usize {
    ScorerOptions::default().min_reporting_periods
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self { min_reporting_periods: default_min_periods(), threads: 0 }
    }
}

impl ScoringSection {
    pub fn scorer_options(&self) -> ScorerOptions {
        ScorerOptions { min_reporting_periods: self.min_reporting_periods }
    }
}

/// Proportional trading costs, deducted from each position's return.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostSection {
    /// Charged on entry and on exit.
    #[serde(default)]
    pub commission_rate: f64,
    /// Charged on exit only.
    #[serde(default)]
    pub tax_rate: f64,
}

impl CostSection {
    /// Return after costs for a position bought at `entry` and sold at `exit`.
    pub fn net_return(&self, entry: f64, exit: f64) -> f64 {
        let paid = entry * (1.0 + self.commission_rate);
        let received = exit * (1.0 - self.commission_rate - self.tax_rate);
        received / paid - 1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSection {
    /// Directory of CSV tables.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Tuned parameter CSV.
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_registry() -> PathBuf {
    PathBuf::from("data/tuned_parameters.csv")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for PathSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry: default_registry(),
            output_dir: default_output_dir(),
        }
    }
}

impl SimulationConfig {
    /// Minimal config with every section at its default.
    pub fn new(start: NaiveDate, end: NaiveDate, model: ModelChoice) -> Self {
        Self {
            backtest: BacktestSection {
                start,
                end,
                initial_capital: default_capital(),
                rebalance: RebalanceFrequency::Monthly,
                model,
                benchmark: None,
                max_price_staleness_days: default_staleness(),
            },
            selection: SelectionSection::default(),
            pool: PoolSection::default(),
            scoring: ScoringSection::default(),
            accessor: AccessorOptions::default(),
            costs: CostSection::default(),
            paths: PathSection::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings no run could honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let b = &self.backtest;
        if b.end < b.start {
            return invalid(format!("backtest.end {} is before backtest.start {}", b.end, b.start));
        }
        if !(b.initial_capital.is_finite() && b.initial_capital > 0.0) {
            return invalid(format!(
                "backtest.initial_capital must be positive, got {}",
                b.initial_capital
            ));
        }
        if b.max_price_staleness_days < 0 {
            return invalid("backtest.max_price_staleness_days must not be negative".into());
        }
        match &b.model {
            ModelChoice::Kind(kind) if kind.as_str().is_empty() => {
                return invalid("backtest.model must name a model kind".into())
            }
            ModelChoice::Best { best: false } => {
                return invalid("backtest.model = { best = false } selects nothing".into())
            }
            _ => {}
        }

        match self.selection.policy()? {
            SelectionPolicy::TopK { k: 0 } => {
                return invalid("selection.top_k must be positive".into())
            }
            SelectionPolicy::Threshold { min_growth, max_positions } => {
                if !min_growth.is_finite() {
                    return invalid("selection.threshold must be finite".into());
                }
                if max_positions == Some(0) {
                    return invalid("selection.max_positions must be positive".into());
                }
            }
            SelectionPolicy::TopK { .. } => {}
        }
        if let Some(cap) = self.selection.max_single_weight {
            if !(cap > 0.0 && cap <= 1.0) {
                return invalid(format!("selection.max_single_weight must be in (0, 1], got {cap}"));
            }
        }

        if self.pool.fixed.is_some() && self.pool.artifact_dir.is_some() {
            return invalid("pool.fixed and pool.artifact_dir are mutually exclusive".into());
        }
        if self.accessor.revenue_lookback == 0 {
            return invalid("accessor.revenue_lookback must be positive".into());
        }
        if self.accessor.revenue_lookback < self.scoring.min_reporting_periods {
            return invalid(format!(
                "accessor.revenue_lookback ({}) is shorter than scoring.min_reporting_periods ({})",
                self.accessor.revenue_lookback, self.scoring.min_reporting_periods
            ));
        }

        let c = &self.costs;
        let rates = [("costs.commission_rate", c.commission_rate), ("costs.tax_rate", c.tax_rate)];
        for (name, rate) in rates {
            if !(0.0..0.5).contains(&rate) {
                return invalid(format!("{name} must be in [0, 0.5), got {rate}"));
            }
        }
        Ok(())
    }

    /// Deterministic id: BLAKE3 of the config's JSON form.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[backtest]
start = "2022-01-01"
end = "2023-12-31"
initial_capital = 500000.0
rebalance = "quarterly"
model = "xgboost"
benchmark = "0050"

[selection]
threshold = 0.05
max_positions = 15
weighting = "confidence_weighted"
max_single_weight = 0.2

[pool]
artifact_dir = "pools"
encoding = "ascii"

[pool.criteria]
code_length = 4
numeric_only = true
exclude_etf = true
min_price_history = 60

[scoring]
min_reporting_periods = 13
threads = 4

[accessor]
call_timeout_ms = 5000
retry = { max_attempts = 4, backoff = { type = "FIXED", delay_ms = 100 } }

[costs]
commission_rate = 0.001425
tax_rate = 0.003
"#;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn linear(start: NaiveDate, end: NaiveDate) -> SimulationConfig {
        SimulationConfig::new(start, end, ModelChoice::Kind("linear".into()))
    }

    #[test]
    fn sample_parses_and_validates() {
        let c = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(c.backtest.rebalance, RebalanceFrequency::Quarterly);
        assert_eq!(c.backtest.benchmark, Some(EquityId::new("0050").unwrap()));
        assert_eq!(
            c.selection.policy().unwrap(),
            SelectionPolicy::Threshold { min_growth: 0.05, max_positions: Some(15) }
        );
        assert_eq!(c.pool.criteria.min_price_history, 60);
        assert_eq!(c.accessor.retry.max_attempts, 4);
        assert_eq!(c.accessor.revenue_lookback, 36);
        assert_eq!(c.paths.output_dir, PathBuf::from("reports"));
    }

    #[test]
    fn best_model_choice_parses() {
        let toml = r#"
[backtest]
start = "2022-01-01"
end = "2022-12-31"
model = { best = true }
"#;
        let c = SimulationConfig::from_toml_str(toml).unwrap();
        assert_eq!(c.backtest.model.to_selection(), ModelSelection::BestScoring);
        assert_eq!(c.selection.policy().unwrap(), SelectionPolicy::TopK { k: 10 });
    }

    #[test]
    fn both_selection_policies_rejected() {
        let mut c = linear(d(2022, 1, 1), d(2022, 12, 31));
        c.selection.threshold = Some(0.1);
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn inverted_dates_rejected() {
        let c = linear(d(2023, 1, 1), d(2022, 12, 31));
        assert!(c.validate().is_err());
    }

    #[test]
    fn weight_cap_must_be_a_fraction() {
        let mut c = linear(d(2022, 1, 1), d(2022, 12, 31));
        c.selection.max_single_weight = Some(1.5);
        assert!(c.validate().is_err());
        c.selection.max_single_weight = Some(1.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn zero_top_k_rejected() {
        let mut c = linear(d(2022, 1, 1), d(2022, 12, 31));
        c.selection.top_k = Some(0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn run_id_deterministic_and_sensitive() {
        let a = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        let b = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(a.run_id().unwrap(), b.run_id().unwrap());
        let mut c = a.clone();
        c.selection.threshold = Some(0.06);
        assert_ne!(a.run_id().unwrap(), c.run_id().unwrap());
    }

    #[test]
    fn net_return_charges_both_legs() {
        let costs = CostSection { commission_rate: 0.001, tax_rate: 0.003 };
        let r = costs.net_return(100.0, 110.0);
        let expected = 110.0 * (1.0 - 0.004) / (100.0 * 1.001) - 1.0;
        assert!((r - expected).abs() < 1e-12);
        assert_eq!(CostSection::default().net_return(100.0, 110.0), 110.0 / 100.0 - 1.0);
    }
}
