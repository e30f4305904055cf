//! The backtest report: one entry per period plus summary statistics.
//!
//! Reports carry no wall-clock timestamps and use ordered collections only,
//! so identical inputs serialize to identical bytes.

use chrono::NaiveDate;
use pitlab_core::domain::{EquityId, ModelKind, ScoreFailure};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::calendar::RebalanceFrequency;
use crate::config::RunId;
use crate::metrics::SummaryStatistics;

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Cancelled before the last period.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodStatus {
    Invested,
    /// No position selected; the portfolio sat in cash.
    Uninvested,
    /// The period could not be evaluated; the portfolio sat in cash.
    Failed { reason: String },
}

impl PeriodStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invested => f.write_str("invested"),
            Self::Uninvested => f.write_str("uninvested"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Which price was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceLeg {
    Entry,
    Exit,
}

/// Why a candidate did not become a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The scorer could not score it.
    Scoring(ScoreFailure),
    /// Selected, but no usable close on the entry or exit date.
    MissingPrice { leg: PriceLeg },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scoring(failure) => write!(f, "{failure}"),
            Self::MissingPrice { leg: PriceLeg::Entry } => f.write_str("missing entry price"),
            Self::MissingPrice { leg: PriceLeg::Exit } => f.write_str("missing exit price"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub equity_id: EquityId,
    pub reason: ExclusionReason,
}

/// A realized position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub equity_id: EquityId,
    pub model_kind: ModelKind,
    pub growth_rate: f64,
    pub confidence: f64,
    pub weight: f64,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub gross_return: f64,
    pub net_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodEntry {
    pub index: usize,
    pub boundary: NaiveDate,
    /// Decision date: last trading day on or before the boundary.
    pub as_of: Option<NaiveDate>,
    /// Realization date: last trading day on or before the next boundary.
    pub exit_date: Option<NaiveDate>,
    pub pool_hash: Option<String>,
    pub candidates: usize,
    pub scored: usize,
    pub positions: Vec<PositionRecord>,
    pub exclusions: Vec<Exclusion>,
    pub cash_weight: f64,
    pub period_return: f64,
    pub benchmark_return: Option<f64>,
    /// NAV after the period.
    pub nav: f64,
    #[serde(flatten)]
    pub status: PeriodStatus,
}

/// Complete result of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub model: String,
    pub selection: String,
    pub rebalance: RebalanceFrequency,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub status: RunStatus,
    pub periods: Vec<PeriodEntry>,
    pub summary: SummaryStatistics,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestReport {
    pub fn positions(&self) -> impl Iterator<Item = (&PeriodEntry, &PositionRecord)> {
        self.periods.iter().flat_map(|p| p.positions.iter().map(move |pos| (p, pos)))
    }

    pub fn failed_periods(&self) -> impl Iterator<Item = &PeriodEntry> {
        self.periods.iter().filter(|p| p.status.is_failed())
    }
}
