//! Fundamentals records and the point-in-time snapshot assembled from them.
//!
//! Every record carries the date it became public. A [`FundamentalsSnapshot`]
//! can only be assembled through [`FundamentalsSnapshot::assemble`], which drops
//! anything published after the as-of date, so a snapshot never holds a value
//! the market could not have known on that day.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::EquityId;

/// A calendar month a revenue figure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub year: i32,
    pub month: u32,
}

impl ReportingPeriod {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Last calendar day of the month.
    pub fn month_end(&self) -> Option<NaiveDate> {
        self.first_day()?
            .checked_add_months(Months::new(1))?
            .pred_opt()
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn year_ago(&self) -> Self {
        Self { year: self.year - 1, month: self.month }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Monthly revenue as reported by the company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub period: ReportingPeriod,
    pub revenue: f64,
    pub published: NaiveDate,
}

/// Financial ratios for one reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioRecord {
    pub period_end: NaiveDate,
    pub published: NaiveDate,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub roe: Option<f64>,
    pub debt_ratio: Option<f64>,
}

/// Quarterly income statement summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub period_end: NaiveDate,
    pub published: NaiveDate,
    pub eps: Option<f64>,
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
}

/// A revenue record with the growth rates known at the snapshot date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueObservation {
    pub period: ReportingPeriod,
    pub revenue: f64,
    pub published: NaiveDate,
    /// Month-over-month growth as a fraction, if the prior month is known.
    pub mom: Option<f64>,
    /// Year-over-year growth as a fraction, if the same month a year earlier is known.
    pub yoy: Option<f64>,
}

/// Everything known about one equity's fundamentals on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsSnapshot {
    pub equity_id: EquityId,
    pub as_of: NaiveDate,
    /// Most recent monthly revenue, ascending by period.
    pub revenue: Vec<RevenueObservation>,
    /// Latest published ratio set.
    pub ratios: Option<RatioRecord>,
    /// Most recent quarterly statements, ascending by period end.
    pub statements: Vec<StatementRecord>,
}

/// Number of quarterly statements kept in a snapshot (two years).
pub const STATEMENT_LOOKBACK: usize = 8;

impl FundamentalsSnapshot {
    /// Build a snapshot from raw records, keeping only what was published on or
    /// before `as_of`. Returns `None` when nothing is known yet.
    ///
    /// Growth rates are computed over the full known history before the revenue
    /// series is cut to the most recent `revenue_lookback` months.
    pub fn assemble(
        equity_id: EquityId,
        as_of: NaiveDate,
        revenues: &[RevenueRecord],
        ratios: &[RatioRecord],
        statements: &[StatementRecord],
        revenue_lookback: usize,
    ) -> Option<Self> {
        let mut known: BTreeMap<ReportingPeriod, &RevenueRecord> = BTreeMap::new();
        for r in revenues.iter().filter(|r| r.published <= as_of) {
            // Restatements: the later publication wins.
            match known.get(&r.period) {
                Some(existing) if existing.published > r.published => {}
                _ => {
                    known.insert(r.period, r);
                }
            }
        }

        let growth = |current: f64, base: Option<&&RevenueRecord>| -> Option<f64> {
            let base = base?.revenue;
            (base > 0.0 && current.is_finite()).then(|| current / base - 1.0)
        };

        let mut revenue: Vec<RevenueObservation> = known
            .values()
            .map(|r| RevenueObservation {
                period: r.period,
                revenue: r.revenue,
                published: r.published,
                mom: growth(r.revenue, known.get(&r.period.previous())),
                yoy: growth(r.revenue, known.get(&r.period.year_ago())),
            })
            .collect();
        if revenue.len() > revenue_lookback {
            revenue.drain(..revenue.len() - revenue_lookback);
        }

        let ratios = ratios
            .iter()
            .filter(|r| r.published <= as_of)
            .max_by(|a, b| {
                (a.period_end, a.published).cmp(&(b.period_end, b.published))
            })
            .cloned();

        let mut statements: Vec<StatementRecord> = statements
            .iter()
            .filter(|s| s.published <= as_of)
            .cloned()
            .collect();
        statements.sort_by(|a, b| (a.period_end, a.published).cmp(&(b.period_end, b.published)));
        statements.dedup_by(|later, earlier| {
            // keep the later publication of a restated quarter
            if later.period_end == earlier.period_end {
                std::mem::swap(later, earlier);
                true
            } else {
                false
            }
        });
        if statements.len() > STATEMENT_LOOKBACK {
            statements.drain(..statements.len() - STATEMENT_LOOKBACK);
        }

        if revenue.is_empty() && ratios.is_none() && statements.is_empty() {
            return None;
        }
        Some(Self { equity_id, as_of, revenue, ratios, statements })
    }

    /// Count of monthly revenue periods in the snapshot.
    pub fn reporting_periods(&self) -> usize {
        self.revenue.len()
    }

    /// The newest publication date of any value in the snapshot.
    pub fn latest_published(&self) -> Option<NaiveDate> {
        let rev = self.revenue.iter().map(|r| r.published);
        let stm = self.statements.iter().map(|s| s.published);
        let rat = self.ratios.iter().map(|r| r.published);
        rev.chain(stm).chain(rat).max()
    }

    pub fn latest_revenue(&self) -> Option<&RevenueObservation> {
        self.revenue.last()
    }
}
