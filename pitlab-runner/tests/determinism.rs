//! Reproducibility: identical inputs give byte-identical reports.

mod support;

use std::sync::Arc;

use pitlab_core::domain::{ModelKind, ScoreResult};
use pitlab_core::models::ModelSet;
use pitlab_runner::selection::{rank, select, SelectionPolicy};
use pitlab_runner::{export_json, MonthlySimulator, SimulationConfig};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use support::{config, d, id, registry, Market};

const CODES: [&str; 6] = ["1101", "1216", "2330", "2454", "2882", "3008"];

fn market() -> Market {
    let mut m = Market::new().benchmark("0050", 0.0004);
    for (i, code) in CODES.iter().enumerate() {
        let step = i as f64 * 0.004;
        m = m.stock(code, 0.0005 + step / 10.0, -0.01 + step, 24);
    }
    m
}

fn run(cfg: SimulationConfig) -> pitlab_runner::BacktestReport {
    let pairs: Vec<(&str, &str)> = CODES
        .iter()
        .flat_map(|c| [(*c, "random_forest"), (*c, "xgboost"), (*c, "linear")])
        .collect();
    let mut sim = MonthlySimulator::new(
        cfg,
        Arc::new(market().build()),
        Arc::new(registry(&pairs)),
        Arc::new(ModelSet::standard()),
    )
    .unwrap();
    sim.run().unwrap()
}

fn base_config(kind: &str) -> SimulationConfig {
    let mut cfg = config(d(2024, 1, 1), d(2024, 9, 30), kind, 3);
    cfg.backtest.benchmark = Some(id("0050"));
    cfg
}

#[test]
fn two_runs_export_identical_bytes() {
    for kind in ["random_forest", "xgboost", "linear"] {
        let a = export_json(&run(base_config(kind))).unwrap();
        let b = export_json(&run(base_config(kind))).unwrap();
        assert_eq!(a, b, "{kind} report differs between runs");
    }
}

#[test]
fn scoring_thread_count_does_not_change_results() {
    let mut serial = base_config("random_forest");
    serial.scoring.threads = 1;
    let mut wide = base_config("random_forest");
    wide.scoring.threads = 4;

    let a = run(serial);
    let b = run(wide);
    assert_eq!(a.periods, b.periods);
    assert_eq!(a.summary, b.summary);
}

#[test]
fn run_id_tracks_configuration() {
    let a = base_config("random_forest");
    let mut b = base_config("random_forest");
    assert_eq!(a.run_id().unwrap(), b.run_id().unwrap());
    b.selection.top_k = Some(4);
    assert_ne!(a.run_id().unwrap(), b.run_id().unwrap());
}

fn scored(code: &str, growth: f64, confidence: f64) -> ScoreResult {
    ScoreResult::scored(id(code), d(2024, 1, 31), ModelKind::new("linear"), growth, confidence)
}

proptest! {
    #[test]
    fn ranking_ignores_input_order(
        growths in prop::collection::vec(-0.5f64..0.5, CODES.len()),
        confs in prop::collection::vec(0.0f64..1.0, CODES.len()),
        seed in any::<u64>(),
        k in 1usize..6,
    ) {
        let results: Vec<ScoreResult> = CODES
            .iter()
            .zip(growths.iter().zip(&confs))
            .map(|(c, (g, conf))| scored(c, (g * 20.0).round() / 20.0, *conf))
            .collect();

        let mut shuffled = results.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

        let a = rank(results);
        let b = rank(shuffled);
        prop_assert_eq!(&a, &b);

        let policy = SelectionPolicy::TopK { k };
        let picked: Vec<_> = select(&a, &policy).iter().map(|r| r.equity_id.clone()).collect();
        prop_assert_eq!(picked.len(), k.min(a.len()));
    }
}
