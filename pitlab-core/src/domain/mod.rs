//! Domain types shared by every layer: equities, bars, fundamentals, scores.

pub mod bar;
pub mod equity;
pub mod fundamentals;
pub mod score;

pub use bar::PriceBar;
pub use equity::{Equity, EquityId, InvalidEquityId, Venue};
pub use fundamentals::{
    FundamentalsSnapshot, RatioRecord, ReportingPeriod, RevenueObservation, RevenueRecord,
    StatementRecord,
};
pub use score::{ModelKind, ScoreFailure, ScoreResult};
