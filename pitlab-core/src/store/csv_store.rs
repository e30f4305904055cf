//! Directory-of-CSV store.
//!
//! Layout:
//! - `equities.csv`: `equity_id,name,venue,is_etf` (required)
//! - `prices.csv`: `equity_id,date,open,high,low,close,volume` (required)
//! - `monthly_revenue.csv`: `equity_id,year,month,revenue,published`
//! - `financial_ratios.csv`: `equity_id,period_end,published,gross_margin,
//!   operating_margin,roe,debt_ratio`
//! - `quarterly_statements.csv`: `equity_id,period_end,published,eps,revenue,net_income`
//!
//! The fundamentals tables are optional. Everything is parsed and validated
//! up front; a malformed date anywhere fails the load.

use chrono::{Duration, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{MarketStore, MemoryStore, StoreError};
use crate::domain::{
    Equity, EquityId, PriceBar, RatioRecord, ReportingPeriod, RevenueRecord, StatementRecord,
    Venue,
};

/// Loader options.
#[derive(Debug, Clone)]
pub struct CsvStoreOptions {
    /// Days after month end at which monthly revenue is assumed public when a
    /// row carries no publication date.
    pub revenue_publication_lag_days: i64,
}

impl Default for CsvStoreOptions {
    fn default() -> Self {
        Self { revenue_publication_lag_days: 10 }
    }
}

/// Store loaded from a directory of CSV tables.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
    inner: MemoryStore,
}

#[derive(Debug, Deserialize)]
struct EquityRow {
    #[serde(alias = "stock_id")]
    equity_id: String,
    #[serde(default, alias = "stock_name")]
    name: String,
    #[serde(default, alias = "market")]
    venue: String,
    #[serde(default)]
    is_etf: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(alias = "stock_id")]
    equity_id: String,
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RevenueRow {
    #[serde(alias = "stock_id")]
    equity_id: String,
    year: i32,
    month: u32,
    revenue: f64,
    #[serde(default)]
    published: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RatioRow {
    #[serde(alias = "stock_id")]
    equity_id: String,
    period_end: String,
    published: String,
    gross_margin: Option<f64>,
    operating_margin: Option<f64>,
    roe: Option<f64>,
    debt_ratio: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatementRow {
    #[serde(alias = "stock_id")]
    equity_id: String,
    period_end: String,
    published: String,
    eps: Option<f64>,
    revenue: Option<f64>,
    net_income: Option<f64>,
}

impl CsvStore {
    pub fn open(dir: impl AsRef<Path>, options: &CsvStoreOptions) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let mut inner = MemoryStore::new().named(format!("csv:{}", dir.display()));

        for (row, r) in read_table::<EquityRow>(&dir.join("equities.csv"), true)? {
            let id = parse_id("equities", row, &r.equity_id)?;
            let is_etf = match r.is_etf.as_deref().map(str::trim) {
                None | Some("") => id.has_fund_prefix(),
                Some(flag) => parse_flag(flag).ok_or_else(|| StoreError::MalformedRow {
                    table: "equities",
                    row,
                    detail: format!("invalid is_etf flag '{flag}'"),
                })?,
            };
            inner.add_equity(Equity::new(id, r.name.trim(), Venue::new(&r.venue), is_etf));
        }

        let mut seen = BTreeSet::new();
        for (row, r) in read_table::<PriceRow>(&dir.join("prices.csv"), true)? {
            let id = parse_id("prices", row, &r.equity_id)?;
            let date = parse_date("prices", row, &r.date)?;
            if !seen.insert((id.clone(), date)) {
                return Err(StoreError::DuplicateRow {
                    table: "prices",
                    equity_id: id,
                    key: date.to_string(),
                });
            }
            let bar = PriceBar {
                date,
                open: r.open.unwrap_or(r.close),
                high: r.high.unwrap_or(r.close),
                low: r.low.unwrap_or(r.close),
                close: r.close,
                volume: r.volume.unwrap_or(0.0).max(0.0) as u64,
            };
            inner.add_bars(&id, [bar]);
        }

        let lag = Duration::days(options.revenue_publication_lag_days);
        for (row, r) in read_table::<RevenueRow>(&dir.join("monthly_revenue.csv"), false)? {
            let id = parse_id("monthly_revenue", row, &r.equity_id)?;
            let period = ReportingPeriod::new(r.year, r.month).ok_or_else(|| {
                StoreError::MalformedRow {
                    table: "monthly_revenue",
                    row,
                    detail: format!("invalid month {}", r.month),
                }
            })?;
            let month_end = period.month_end().ok_or_else(|| StoreError::MalformedRow {
                table: "monthly_revenue",
                row,
                detail: format!("period {period} out of calendar range"),
            })?;
            let published = match r.published.as_deref().map(str::trim) {
                None | Some("") => month_end + lag,
                Some(raw) => parse_date("monthly_revenue", row, raw)?,
            };
            check_publication("monthly_revenue", row, month_end, published)?;
            inner.add_revenue(&id, [RevenueRecord { period, revenue: r.revenue, published }]);
        }

        for (row, r) in read_table::<RatioRow>(&dir.join("financial_ratios.csv"), false)? {
            let id = parse_id("financial_ratios", row, &r.equity_id)?;
            let period_end = parse_date("financial_ratios", row, &r.period_end)?;
            let published = parse_date("financial_ratios", row, &r.published)?;
            check_publication("financial_ratios", row, period_end, published)?;
            inner.add_ratios(
                &id,
                [RatioRecord {
                    period_end,
                    published,
                    gross_margin: r.gross_margin,
                    operating_margin: r.operating_margin,
                    roe: r.roe,
                    debt_ratio: r.debt_ratio,
                }],
            );
        }

        for (row, r) in read_table::<StatementRow>(&dir.join("quarterly_statements.csv"), false)? {
            let id = parse_id("quarterly_statements", row, &r.equity_id)?;
            let period_end = parse_date("quarterly_statements", row, &r.period_end)?;
            let published = parse_date("quarterly_statements", row, &r.published)?;
            check_publication("quarterly_statements", row, period_end, published)?;
            inner.add_statements(
                &id,
                [StatementRecord {
                    period_end,
                    published,
                    eps: r.eps,
                    revenue: r.revenue,
                    net_income: r.net_income,
                }],
            );
        }

        info!(dir = %dir.display(), equities = inner.equity_count(), "loaded CSV store");
        Ok(Self { dir, inner })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Read every row of a table. A missing optional table is empty.
fn read_table<T: DeserializeOwned>(
    path: &Path,
    required: bool,
) -> Result<Vec<(usize, T)>, StoreError> {
    if !path.exists() {
        if required {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "required table missing"),
            });
        }
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| StoreError::Csv { path: path.to_path_buf(), source })?;
    let mut rows = Vec::new();
    for (index, row) in rdr.deserialize::<T>().enumerate() {
        let row = row.map_err(|source| StoreError::Csv { path: path.to_path_buf(), source })?;
        rows.push((index + 2, row));
    }
    Ok(rows)
}

fn parse_id(table: &'static str, row: usize, raw: &str) -> Result<EquityId, StoreError> {
    EquityId::new(raw).map_err(|e| StoreError::MalformedRow { table, row, detail: e.to_string() })
}

/// Dates are ISO `YYYY-MM-DD`; `YYYY/MM/DD` is accepted from older exports.
pub(crate) fn parse_date(
    table: &'static str,
    row: usize,
    raw: &str,
) -> Result<NaiveDate, StoreError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .map_err(|_| StoreError::MalformedDateField { table, row, value: raw.to_string() })
}

fn check_publication(
    table: &'static str,
    row: usize,
    period_end: NaiveDate,
    published: NaiveDate,
) -> Result<(), StoreError> {
    if published < period_end {
        return Err(StoreError::MalformedRow {
            table,
            row,
            detail: format!("published {published} precedes period end {period_end}"),
        });
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

impl MarketStore for CsvStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn equities(&self) -> Result<Vec<Equity>, StoreError> {
        self.inner.equities()
    }

    fn prices(
        &self,
        equity_id: &EquityId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, StoreError> {
        self.inner.prices(equity_id, start, end)
    }

    fn monthly_revenue(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<RevenueRecord>, StoreError> {
        self.inner.monthly_revenue(equity_id, published_by)
    }

    fn ratios(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<RatioRecord>, StoreError> {
        self.inner.ratios(equity_id, published_by)
    }

    fn statements(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<StatementRecord>, StoreError> {
        self.inner.statements(equity_id, published_by)
    }
}
