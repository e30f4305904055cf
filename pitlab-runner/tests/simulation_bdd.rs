//! BDD scenarios for the walk-forward simulator.

mod support;

use std::sync::Arc;

use pitlab_core::domain::ScoreFailure;
use pitlab_core::models::ModelSet;
use pitlab_runner::report::{ExclusionReason, PriceLeg};
use pitlab_runner::{
    MonthlySimulator, PeriodStatus, RebalanceFrequency, RunStatus, WeightingPolicy,
};
use support::{config, d, id, registry, Market};

fn simulate(
    market: Market,
    pairs: &[(&str, &str)],
    cfg: pitlab_runner::SimulationConfig,
) -> pitlab_runner::BacktestReport {
    let mut sim = MonthlySimulator::new(
        cfg,
        Arc::new(market.build()),
        Arc::new(registry(pairs)),
        Arc::new(ModelSet::standard()),
    )
    .expect("simulator should start");
    sim.run().expect("run should finish")
}

#[test]
fn bdd_scenario_full_partial_and_untuned_equities() {
    // GIVEN A with 24 months of revenue, B with 2 months, C with no tuned parameters
    let market = Market::new()
        .stock("2330", 0.001, 0.02, 24)
        .stock("2454", 0.001, 0.02, 2)
        .stock("1101", 0.001, 0.02, 24);
    let pairs = [("2330", "random_forest"), ("2454", "random_forest")];

    // WHEN a single month is simulated with top-1 selection
    let cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 1);
    let report = simulate(market, &pairs, cfg);

    // THEN A is selected, B lacks history and C lacks parameters
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.periods.len(), 1);
    let period = &report.periods[0];
    assert_eq!(period.status, PeriodStatus::Invested);
    assert_eq!(period.as_of, Some(d(2024, 1, 31)));
    assert_eq!(period.exit_date, Some(d(2024, 2, 29)));
    assert_eq!(period.candidates, 3);
    assert_eq!(period.scored, 1);
    assert_eq!(period.positions.len(), 1);
    assert_eq!(period.positions[0].equity_id, id("2330"));
    assert_eq!(period.positions[0].weight, 1.0);

    let reason_for = |code: &str| {
        period
            .exclusions
            .iter()
            .find(|e| e.equity_id == id(code))
            .map(|e| e.reason.clone())
    };
    let short = ScoreFailure::InsufficientHistory { available: 2, required: 13 };
    assert_eq!(reason_for("2454"), Some(ExclusionReason::Scoring(short)));
    assert_eq!(reason_for("1101"), Some(ExclusionReason::Scoring(ScoreFailure::ParametersMissing)));

    // AND the realized return is the price move from entry to exit
    let pos = &period.positions[0];
    assert!((pos.gross_return - (pos.exit_price / pos.entry_price - 1.0)).abs() < 1e-12);
    assert!(pos.gross_return > 0.0);
    assert!((report.summary.final_nav - 1_000_000.0 * (1.0 + pos.net_return)).abs() < 1e-6);
}

#[test]
fn bdd_scenario_missing_registry_entry_drops_exactly_one() {
    // GIVEN five equally tuned equities
    let codes = ["1101", "2330", "2454", "3008", "6505"];
    let mut market = Market::new();
    for code in codes {
        market = market.stock(code, 0.001, 0.01, 24);
    }
    let all: Vec<(&str, &str)> = codes.iter().map(|c| (*c, "random_forest")).collect();
    let without: Vec<(&str, &str)> = all.iter().copied().filter(|(c, _)| *c != "3008").collect();

    // WHEN the same month runs with and without 3008's parameters
    let cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 10);
    let full = simulate(market, &all, cfg.clone());
    let mut market = Market::new();
    for code in codes {
        market = market.stock(code, 0.001, 0.01, 24);
    }
    let reduced = simulate(market, &without, cfg);

    // THEN exactly one fewer candidate is scored, for the stated reason
    assert_eq!(full.periods[0].scored, 5);
    assert_eq!(reduced.periods[0].scored, 4);
    assert_eq!(reduced.periods[0].exclusions.len(), 1);
    let excluded = &reduced.periods[0].exclusions[0];
    assert_eq!(excluded.equity_id, id("3008"));
    assert_eq!(excluded.reason, ExclusionReason::Scoring(ScoreFailure::ParametersMissing));
}

#[test]
fn bdd_scenario_no_scored_candidates_stays_in_cash() {
    // GIVEN a market but an empty registry
    let market = Market::new().stock("2330", 0.002, 0.02, 24).stock("2454", 0.002, 0.02, 24);

    // WHEN a month is simulated
    let report = simulate(market, &[], config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 3));

    // THEN the period is uninvested with zero return and the run completes
    let period = &report.periods[0];
    assert_eq!(period.status, PeriodStatus::Uninvested);
    assert_eq!(period.period_return, 0.0);
    assert_eq!(period.cash_weight, 1.0);
    assert_eq!(period.exclusions.len(), 2);
    assert_eq!(report.summary.uninvested_periods, 1);
    assert_eq!(report.summary.final_nav, 1_000_000.0);
    assert_eq!(report.status, RunStatus::Completed);
}

#[test]
fn bdd_scenario_multi_month_top_k_with_benchmark() {
    // GIVEN three growers of different strength and a benchmark fund
    let market = Market::new()
        .stock("2330", 0.002, 0.03, 24)
        .stock("2454", 0.001, 0.02, 24)
        .stock("6505", -0.001, -0.01, 24)
        .benchmark("0050", 0.0005);
    let pairs = [("2330", "random_forest"), ("2454", "random_forest"), ("6505", "random_forest")];
    let mut cfg = config(d(2024, 1, 1), d(2024, 5, 31), "random_forest", 2);
    cfg.backtest.benchmark = Some(id("0050"));

    // WHEN five monthly periods are simulated
    let report = simulate(market, &pairs, cfg);

    // THEN every period holds the two strongest growers, strongest first
    assert_eq!(report.periods.len(), 5);
    for p in &report.periods {
        assert_eq!(p.status, PeriodStatus::Invested);
        let held: Vec<_> = p.positions.iter().map(|pos| pos.equity_id.as_str()).collect();
        assert_eq!(held, vec!["2330", "2454"]);
        assert!(p.benchmark_return.is_some());
    }

    // AND NAV compounds the period returns
    let compounded =
        report.periods.iter().fold(1_000_000.0, |nav, p| nav * (1.0 + p.period_return));
    assert!((report.summary.final_nav - compounded).abs() < 1e-6);
    assert_eq!(report.summary.invested_periods, 5);
    assert_eq!(report.summary.total_positions, 10);
    assert!(report.summary.benchmark_cumulative_return.is_some());
    assert!(report.summary.excess_return.is_some());
    assert!(report.summary.max_drawdown <= 0.0);
}

#[test]
fn bdd_scenario_threshold_selection_with_weight_cap() {
    // GIVEN two fast growers and one decliner
    let market = Market::new()
        .stock("2330", 0.002, 0.03, 24)
        .stock("2454", 0.001, 0.02, 24)
        .stock("6505", -0.001, -0.01, 24);
    let pairs = [("2330", "random_forest"), ("2454", "random_forest"), ("6505", "random_forest")];

    // WHEN selecting growth >= 0 with a 40% cap per position
    let mut cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 1);
    cfg.selection.top_k = None;
    cfg.selection.threshold = Some(0.0);
    cfg.selection.max_single_weight = Some(0.4);
    let report = simulate(market, &pairs, cfg);

    // THEN only the growers are held and the capped excess sits in cash
    let p = &report.periods[0];
    assert_eq!(p.positions.len(), 2);
    assert!(p.positions.iter().all(|pos| (pos.weight - 0.4).abs() < 1e-12));
    assert!((p.cash_weight - 0.2).abs() < 1e-12);
}

#[test]
fn bdd_scenario_confidence_weighting_sums_to_one() {
    let market = Market::new().stock("2330", 0.002, 0.03, 24).stock("2454", 0.001, 0.02, 24);
    let pairs = [("2330", "random_forest"), ("2454", "random_forest")];
    let mut cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 2);
    cfg.selection.weighting = WeightingPolicy::ConfidenceWeighted;

    let report = simulate(market, &pairs, cfg);

    let total: f64 = report.periods[0].positions.iter().map(|p| p.weight).sum();
    assert!((total - 1.0).abs() < 1e-12);
    assert!(report.periods[0].cash_weight.abs() < 1e-12);
}

#[test]
fn bdd_scenario_missing_exit_price_renormalizes() {
    // GIVEN two selected equities, one of which stops trading mid-February
    let market = Market::new()
        .stock("2330", 0.002, 0.03, 24)
        .stock_until("2454", 0.001, 0.02, 24, d(2024, 2, 9));
    let pairs = [("2330", "random_forest"), ("2454", "random_forest")];

    // WHEN January is realized at the end of February
    let cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 2);
    let report = simulate(market, &pairs, cfg);

    // THEN the halted equity is dropped for a missing exit price and the
    // survivor carries the full weight
    let p = &report.periods[0];
    assert_eq!(p.positions.len(), 1);
    assert_eq!(p.positions[0].equity_id, id("2330"));
    assert_eq!(p.positions[0].weight, 1.0);
    assert!(p.exclusions.iter().any(|e| e.equity_id == id("2454")
        && e.reason == ExclusionReason::MissingPrice { leg: PriceLeg::Exit }));
}

#[test]
fn bdd_scenario_exit_after_last_bar_is_missing_not_flat() {
    // GIVEN an equity whose last bar is the decision date itself
    let market = Market::new()
        .stock("2330", 0.002, 0.03, 24)
        .stock_until("2454", 0.001, 0.02, 24, d(2024, 1, 31));
    let pairs = [("2330", "random_forest"), ("2454", "random_forest")];

    // WHEN stale closes are accepted for well over a month
    let mut cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 2);
    cfg.backtest.max_price_staleness_days = 45;
    let report = simulate(market, &pairs, cfg);

    // THEN the entry close is not reused as an exit price
    let p = &report.periods[0];
    assert_eq!(p.exit_date, Some(d(2024, 2, 29)));
    let held: Vec<_> = p.positions.iter().map(|pos| pos.equity_id.as_str()).collect();
    assert_eq!(held, vec!["2330"]);
    assert!(p.exclusions.iter().any(|e| e.equity_id == id("2454")
        && e.reason == ExclusionReason::MissingPrice { leg: PriceLeg::Exit }));
}

#[test]
fn bdd_scenario_quarterly_rebalancing_uses_last_trading_day() {
    let market = Market::new().stock("2330", 0.001, 0.02, 24);
    let mut cfg = config(d(2023, 12, 1), d(2024, 5, 31), "random_forest", 1);
    cfg.backtest.rebalance = RebalanceFrequency::Quarterly;

    let report = simulate(market, &[("2330", "random_forest")], cfg);

    // 2023-12-31 is a Sunday
    assert_eq!(report.periods.len(), 2);
    assert_eq!(report.periods[0].as_of, Some(d(2023, 12, 29)));
    assert_eq!(report.periods[1].boundary, d(2024, 3, 31));
    assert_eq!(report.periods[1].as_of, Some(d(2024, 3, 29)));
}

#[test]
fn bdd_scenario_transaction_costs_reduce_returns() {
    let pairs = [("2330", "random_forest")];
    let gross = simulate(
        Market::new().stock("2330", 0.002, 0.03, 24),
        &pairs,
        config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 1),
    );
    let mut cfg = config(d(2024, 1, 1), d(2024, 1, 31), "random_forest", 1);
    cfg.costs.commission_rate = 0.001425;
    cfg.costs.tax_rate = 0.003;
    let net = simulate(Market::new().stock("2330", 0.002, 0.03, 24), &pairs, cfg);

    let g = &gross.periods[0].positions[0];
    let n = &net.periods[0].positions[0];
    assert_eq!(g.gross_return, n.gross_return);
    assert!(n.net_return < g.net_return);
    assert!(net.summary.final_nav < gross.summary.final_nav);
}
