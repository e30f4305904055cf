//! Point-in-time guarantees: nothing published after the as-of date can
//! influence a score.

use chrono::{Duration, NaiveDate};
use pitlab_core::domain::{
    Equity, PriceBar, RatioRecord, ReportingPeriod, RevenueRecord, StatementRecord, Venue,
};
use pitlab_core::models::ModelSet;
use pitlab_core::registry::TunedParameters;
use pitlab_core::store::MemoryStore;
use pitlab_core::{
    Accessor, AccessorOptions, EquityId, ModelKind, ModelSelection, ParameterRegistry, Scorer,
    ScorerOptions,
};
use proptest::prelude::*;
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn tsmc() -> EquityId {
    EquityId::new("2330").unwrap()
}

/// Monthly revenue 2019-01 through 2023-12, each published ten days after month end.
fn revenue_history(noise: &[f64]) -> Vec<RevenueRecord> {
    let mut out = Vec::new();
    let mut period = ReportingPeriod::new(2019, 1).unwrap();
    let mut level = 1_000.0;
    for i in 0..60 {
        let bump = noise.get(i % noise.len().max(1)).copied().unwrap_or(0.0);
        out.push(RevenueRecord {
            period,
            revenue: level * (1.0 + bump),
            published: period.month_end().unwrap() + Duration::days(10),
        });
        level *= 1.015;
        period = ReportingPeriod::of(period.month_end().unwrap() + Duration::days(1));
    }
    out
}

fn quarterly_statements() -> Vec<StatementRecord> {
    (0..20)
        .map(|q| {
            let year = 2019 + q / 4;
            let month = [3, 6, 9, 12][(q % 4) as usize];
            let end = ReportingPeriod::new(year, month).unwrap().month_end().unwrap();
            StatementRecord {
                period_end: end,
                published: end + Duration::days(45),
                eps: Some(2.0 + q as f64 * 0.1),
                revenue: Some(3_000.0 + q as f64 * 50.0),
                net_income: Some(900.0 + q as f64 * 20.0),
            }
        })
        .collect()
}

fn ratios() -> Vec<RatioRecord> {
    quarterly_statements()
        .into_iter()
        .map(|s| RatioRecord {
            period_end: s.period_end,
            published: s.published,
            gross_margin: Some(0.5),
            operating_margin: Some(0.4),
            roe: Some(0.25),
            debt_ratio: Some(0.3),
        })
        .collect()
}

fn scorer_over(store: MemoryStore, kind: &str) -> Scorer {
    let accessor = Accessor::connect(Arc::new(store), AccessorOptions::default()).unwrap();
    let registry = ParameterRegistry::from_entries(vec![(
        tsmc(),
        ModelKind::new(kind),
        TunedParameters::default(),
    )])
    .unwrap();
    Scorer::new(
        Arc::new(registry),
        Arc::new(accessor),
        Arc::new(ModelSet::standard()),
        ModelSelection::fixed(kind),
        ScorerOptions::default(),
    )
}

/// Store holding only what was public on `as_of`.
fn public_on(as_of: NaiveDate) -> MemoryStore {
    let id = tsmc();
    MemoryStore::new()
        .with_equity(Equity::new(id.clone(), "TSMC", Venue::new("TWSE"), false))
        .with_bars(&id, [PriceBar::flat(d(2019, 1, 2), 250.0, 1_000)])
        .with_revenue(&id, revenue_history(&[0.0]).into_iter().filter(|r| r.published <= as_of))
        .with_statements(&id, quarterly_statements().into_iter().filter(|s| s.published <= as_of))
        .with_ratios(&id, ratios().into_iter().filter(|r| r.published <= as_of))
}

/// Same history plus future rows with arbitrary values and late restatements.
fn with_future(as_of: NaiveDate, noise: &[f64]) -> MemoryStore {
    let id = tsmc();
    let future_revenue = revenue_history(noise).into_iter().filter(|r| r.published > as_of);
    let restatements = revenue_history(noise)
        .into_iter()
        .filter(|r| r.published <= as_of)
        .map(|mut r| {
            r.revenue *= 3.0;
            r.published = as_of + Duration::days(1);
            r
        });
    let future_statements = quarterly_statements()
        .into_iter()
        .filter(|s| s.published > as_of)
        .map(|mut s| {
            s.eps = s.eps.map(|e| e * -5.0);
            s
        });
    public_on(as_of)
        .with_revenue(&id, future_revenue.chain(restatements))
        .with_statements(&id, future_statements)
}

#[test]
fn snapshot_never_contains_future_publications() {
    let as_of = d(2021, 6, 30);
    let accessor =
        Accessor::connect(Arc::new(with_future(as_of, &[0.4, -0.2])), AccessorOptions::default())
            .unwrap();
    let snap = accessor.snapshot(&tsmc(), as_of).unwrap().unwrap();
    assert!(snap.latest_published().unwrap() <= as_of);
    assert!(snap.revenue.iter().all(|r| r.published <= as_of));
    assert!(snap.statements.iter().all(|s| s.published <= as_of));
    // May revenue is published June 10; June revenue is not out yet
    assert_eq!(snap.latest_revenue().unwrap().period, ReportingPeriod::new(2021, 5).unwrap());
}

#[test]
fn price_history_is_cut_at_as_of() {
    let id = tsmc();
    let bars =
        (0..30).map(|i| PriceBar::flat(d(2024, 1, 1) + Duration::days(i), 100.0 + i as f64, 1));
    let store = MemoryStore::new()
        .with_equity(Equity::new(id.clone(), "TSMC", Venue::new("TWSE"), false))
        .with_bars(&id, bars);
    let accessor = Accessor::connect(Arc::new(store), AccessorOptions::default()).unwrap();
    let history = accessor.price_history_through(&id, d(2024, 1, 15)).unwrap();
    assert_eq!(history.len(), 15);
    assert!(history.iter().all(|b| b.date <= d(2024, 1, 15)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn future_rows_do_not_change_scores(
        day_offset in 0i64..700,
        noise in prop::collection::vec(-0.5f64..0.5, 1..6),
        kind in prop::sample::select(vec!["random_forest", "xgboost", "linear"]),
    ) {
        let as_of = d(2021, 1, 1) + Duration::days(day_offset);
        let clean = scorer_over(public_on(as_of), kind).score(&tsmc(), as_of);
        let leaky = scorer_over(with_future(as_of, &noise), kind).score(&tsmc(), as_of);
        prop_assert_eq!(clean, leaky);
    }
}
