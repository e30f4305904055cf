//! Daily price bar.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single equity on a single trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceBar {
    /// A bar with a flat OHLC at `close`, handy for fixtures and sparse feeds.
    pub fn flat(date: NaiveDate, close: f64, volume: u64) -> Self {
        Self { date, open: close, high: close, low: close, close, volume }
    }

    /// True when the close is usable as an entry or exit price.
    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}
