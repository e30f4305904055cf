//! Synthetic market fixtures shared by the integration tests.

#![allow(dead_code)]

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use pitlab_core::domain::{
    Equity, EquityId, ModelKind, PriceBar, ReportingPeriod, RevenueRecord, Venue,
};
use pitlab_core::registry::TunedParameters;
use pitlab_core::store::MemoryStore;
use pitlab_core::ParameterRegistry;
use pitlab_runner::{ModelChoice, SimulationConfig};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn id(code: &str) -> EquityId {
    EquityId::new(code).unwrap()
}

/// Weekday bars from `start` to `end`, compounding `daily_growth`.
pub fn weekday_bars(
    start: NaiveDate,
    end: NaiveDate,
    first_close: f64,
    daily_growth: f64,
) -> Vec<PriceBar> {
    let mut bars = Vec::new();
    let mut date = start;
    let mut close = first_close;
    while date <= end {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            bars.push(PriceBar::flat(date, close, 10_000));
            close *= 1.0 + daily_growth;
        }
        date += Duration::days(1);
    }
    bars
}

/// `months` of monthly revenue starting at `first`, each published ten days
/// after its month end.
pub fn monthly_revenue(first: ReportingPeriod, months: u32, growth: f64) -> Vec<RevenueRecord> {
    let mut out = Vec::new();
    let mut period = first;
    let mut level = 1_000.0;
    for _ in 0..months {
        let end = period.month_end().unwrap();
        out.push(RevenueRecord { period, revenue: level, published: end + Duration::days(10) });
        level *= 1.0 + growth;
        period = ReportingPeriod::of(end + Duration::days(1));
    }
    out
}

/// Builder for a small synthetic market.
#[derive(Default)]
pub struct Market {
    store: MemoryStore,
}

impl Market {
    pub fn new() -> Self {
        Self { store: MemoryStore::new().named("synthetic") }
    }

    /// An ordinary share with prices from mid-2022 to end of 2024 and
    /// `revenue_months` of revenue ending December 2023.
    pub fn stock(
        self,
        code: &str,
        daily_growth: f64,
        revenue_growth: f64,
        revenue_months: u32,
    ) -> Self {
        self.stock_until(code, daily_growth, revenue_growth, revenue_months, d(2024, 12, 31))
    }

    /// Like [`Market::stock`] but with no bars after `last_bar`.
    pub fn stock_until(
        mut self,
        code: &str,
        daily_growth: f64,
        revenue_growth: f64,
        revenue_months: u32,
        last_bar: NaiveDate,
    ) -> Self {
        let eid = id(code);
        let name = format!("Stock {code}");
        self.store.add_equity(Equity::new(eid.clone(), name, Venue::new("TWSE"), false));
        self.store.add_bars(&eid, weekday_bars(d(2022, 6, 1), last_bar, 100.0, daily_growth));
        if revenue_months > 0 {
            let mut first = ReportingPeriod::new(2024, 1).unwrap();
            for _ in 0..revenue_months {
                first = first.previous();
            }
            self.store.add_revenue(&eid, monthly_revenue(first, revenue_months, revenue_growth));
        }
        self
    }

    /// A fund used as calendar and benchmark.
    pub fn benchmark(mut self, code: &str, daily_growth: f64) -> Self {
        let eid = id(code);
        self.store.add_equity(Equity::new(eid.clone(), "Benchmark", Venue::new("TWSE"), true));
        self.store.add_bars(&eid, weekday_bars(d(2022, 6, 1), d(2024, 12, 31), 50.0, daily_growth));
        self
    }

    pub fn build(self) -> MemoryStore {
        self.store
    }
}

/// Default tuned parameters for every (code, kind) pair.
pub fn registry(pairs: &[(&str, &str)]) -> ParameterRegistry {
    ParameterRegistry::from_entries(
        pairs
            .iter()
            .map(|(code, kind)| (id(code), ModelKind::new(kind), TunedParameters::default())),
    )
    .unwrap()
}

/// Monthly run over `[start, end]` with a fixed model and top-K selection,
/// no retry delays.
pub fn config(start: NaiveDate, end: NaiveDate, kind: &str, top_k: usize) -> SimulationConfig {
    let mut c = SimulationConfig::new(start, end, ModelChoice::Kind(ModelKind::new(kind)));
    c.selection.top_k = Some(top_k);
    c.accessor.retry = pitlab_core::accessor::RetryPolicy::immediate(2);
    c
}
