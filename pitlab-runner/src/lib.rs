//! PitLab Runner: walk-forward simulation, selection, reports, metrics.
//!
//! This crate builds on `pitlab-core` to provide:
//! - TOML simulation configuration with validation and run ids
//! - Rebalancing calendar (monthly or quarterly boundaries)
//! - Ranking, top-K / threshold selection and weighting policies
//! - The period-by-period simulator with cancellation
//! - Backtest reports, summary statistics and JSON/CSV export

pub mod calendar;
pub mod config;
pub mod export;
pub mod metrics;
pub mod portfolio;
pub mod report;
pub mod selection;
pub mod simulator;

pub use calendar::RebalanceFrequency;
pub use config::{ConfigError, ModelChoice, RunId, SimulationConfig};
pub use export::{export_json, import_json, write_report, ReportPaths};
pub use metrics::SummaryStatistics;
pub use portfolio::PortfolioState;
pub use report::{BacktestReport, PeriodEntry, PeriodStatus, RunStatus, SCHEMA_VERSION};
pub use selection::{SelectionPolicy, WeightingPolicy};
pub use simulator::{CancelToken, MonthlySimulator, Phase, SimulationError};
