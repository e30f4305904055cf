//! Rebalancing boundaries.
//!
//! A boundary is a calendar month end. Every boundary inside the range is a
//! decision date, realized on the following boundary even when that one falls
//! after the range end.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceFrequency {
    #[default]
    Monthly,
    /// March, June, September and December month ends.
    Quarterly,
}

impl RebalanceFrequency {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Self::Monthly => 12.0,
            Self::Quarterly => 4.0,
        }
    }

    fn includes(self, month: u32) -> bool {
        match self {
            Self::Monthly => true,
            Self::Quarterly => month % 3 == 0,
        }
    }
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monthly => f.write_str("monthly"),
            Self::Quarterly => f.write_str("quarterly"),
        }
    }
}

impl std::str::FromStr for RebalanceFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "m" => Ok(Self::Monthly),
            "quarterly" | "q" => Ok(Self::Quarterly),
            other => Err(format!("unknown rebalance frequency '{other}'")),
        }
    }
}

/// Last calendar day of `date`'s month.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Boundaries within `[start, end]`, ascending.
pub fn boundaries(
    start: NaiveDate,
    end: NaiveDate,
    frequency: RebalanceFrequency,
) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut current = month_end(start);
    while current <= end {
        if frequency.includes(current.month()) {
            out.push(current);
        }
        match current.succ_opt() {
            Some(next) => current = month_end(next),
            None => break,
        }
    }
    out
}

/// The first boundary strictly after `boundary`.
pub fn next_boundary(boundary: NaiveDate, frequency: RebalanceFrequency) -> NaiveDate {
    let mut current = boundary;
    while let Some(next) = current.succ_opt() {
        current = month_end(next);
        if frequency.includes(current.month()) {
            return current;
        }
    }
    NaiveDate::MAX
}

/// One decision window: decide on `boundary`, realize on `next_boundary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub index: usize,
    pub boundary: NaiveDate,
    pub next_boundary: NaiveDate,
}

pub fn periods(start: NaiveDate, end: NaiveDate, frequency: RebalanceFrequency) -> Vec<Period> {
    boundaries(start, end, frequency)
        .into_iter()
        .enumerate()
        .map(|(index, boundary)| Period {
            index,
            boundary,
            next_boundary: next_boundary(boundary, frequency),
        })
        .collect()
}
