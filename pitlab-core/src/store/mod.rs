//! Read-only market data store.
//!
//! The [`MarketStore`] trait is the only surface through which price and
//! fundamentals data enter the system. Implementations are dumb row sources:
//! point-in-time filtering and normalization live in the accessor above them,
//! so a store that leaks future rows still cannot leak them into a decision.

pub mod csv_store;
pub mod memory;

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{Equity, EquityId, PriceBar, RatioRecord, RevenueRecord, StatementRecord};

pub use csv_store::{CsvStore, CsvStoreOptions};
pub use memory::MemoryStore;

/// Structured store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("{table} row {row}: malformed date field '{value}'")]
    MalformedDateField { table: &'static str, row: usize, value: String },

    #[error("{table} row {row}: {detail}")]
    MalformedRow { table: &'static str, row: usize, detail: String },

    #[error("{table}: duplicate row for {equity_id} at {key}")]
    DuplicateRow { table: &'static str, equity_id: EquityId, key: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl StoreError {
    /// Transient errors may succeed on retry; everything else is a data defect.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

/// Row source for equities, prices and fundamentals.
///
/// `published_by` arguments let a backend push the publication cut-off down
/// into its query; callers must not rely on it being honored.
pub trait MarketStore: Send + Sync {
    /// Human-readable name of this store.
    fn name(&self) -> &str;

    /// Reference data for every known equity.
    fn equities(&self) -> Result<Vec<Equity>, StoreError>;

    /// Daily bars with `start <= date <= end`, in any order.
    fn prices(
        &self,
        equity_id: &EquityId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, StoreError>;

    fn monthly_revenue(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<RevenueRecord>, StoreError>;

    fn ratios(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<RatioRecord>, StoreError>;

    fn statements(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<StatementRecord>, StoreError>;
}
