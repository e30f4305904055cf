//! Walk-forward monthly simulator.
//!
//! Periods run strictly in sequence. Each one moves through
//! `BuildingPool → Scoring → Selecting → Realizing → Reporting`; the whole
//! run starts `Initialized` and ends `Finalized`. A period stages its
//! portfolio change as a [`PeriodUpdate`] and commits it only after
//! reporting, so a period abandoned part-way leaves no trace.
//!
//! Scoring inside a period fans out over rayon. Results are re-sorted by
//! equity id before ranking, so worker scheduling never shows in the report.

use chrono::NaiveDate;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use pitlab_core::accessor::{Accessor, AccessorError};
use pitlab_core::domain::{EquityId, ModelKind, PriceBar, ScoreFailure, ScoreResult};
use pitlab_core::models::ModelSet;
use pitlab_core::pool::{load_pool, CandidatePool, PoolBuilder, PoolError, PoolStore};
use pitlab_core::registry::{ParameterRegistry, RegistryError};
use pitlab_core::scorer::{ModelSelection, Scorer};
use pitlab_core::store::{CsvStore, CsvStoreOptions, MarketStore, StoreError};

use crate::calendar::{self, Period};
use crate::config::{ConfigError, RunId, SimulationConfig};
use crate::metrics::SummaryStatistics;
use crate::portfolio::{HeldPosition, PeriodUpdate, PortfolioState};
use crate::report::{
    BacktestReport, Exclusion, ExclusionReason, PeriodEntry, PeriodStatus, PositionRecord,
    PriceLeg, RunStatus, SCHEMA_VERSION,
};
use crate::selection::{self, SelectionPolicy};

/// Fatal simulation errors. Everything per-equity or per-period is reported
/// in the [`BacktestReport`] instead.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("parameter registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("market store: {0}")]
    Store(#[from] StoreError),

    #[error("accessor: {0}")]
    Accessor(#[from] AccessorError),

    #[error("fixed pool: {0}")]
    Pool(#[from] PoolError),

    #[error("no predictor registered for model kind '{0}'")]
    UnknownModel(ModelKind),

    #[error("cannot start scoring threads: {0}")]
    ThreadPool(String),

    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("simulation already finalized")]
    Finalized,
}

/// Simulator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    BuildingPool,
    Scoring,
    Selecting,
    Realizing,
    Reporting,
    Finalized,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Initialized, BuildingPool) | (Initialized, Finalized) => true,
            (BuildingPool, Scoring) | (Scoring, Selecting) | (Selecting, Realizing) => true,
            (Realizing, Reporting) => true,
            // failed, empty or cancelled periods skip ahead
            (BuildingPool | Scoring | Selecting, Reporting) => true,
            (BuildingPool | Scoring | Selecting | Realizing, Finalized) => true,
            (Reporting, BuildingPool) | (Reporting, Finalized) => true,
            _ => false,
        }
    }
}

/// Shared cancellation flag. Checked between periods and before a period
/// commits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum PoolPlan {
    Fixed(CandidatePool),
    Build { builder: PoolBuilder, artifacts: Option<PoolStore> },
}

enum PeriodOutcome {
    Finished { entry: PeriodEntry, update: PeriodUpdate },
    Cancelled,
}

/// A selected candidate with both prices resolved.
struct Priced<'a> {
    score: &'a ScoreResult,
    entry: PriceBar,
    exit: PriceBar,
}

pub struct MonthlySimulator {
    config: SimulationConfig,
    run_id: RunId,
    accessor: Arc<Accessor>,
    scorer: Scorer,
    pools: PoolPlan,
    policy: SelectionPolicy,
    workers: Option<rayon::ThreadPool>,
    cancel: CancelToken,
    phase: Phase,
    portfolio: PortfolioState,
}

impl std::fmt::Debug for MonthlySimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonthlySimulator")
            .field("run_id", &self.run_id)
            .field("phase", &self.phase)
            .field("store", &self.accessor.store_name())
            .finish()
    }
}

impl MonthlySimulator {
    /// Wire a simulator over an existing store and registry.
    pub fn new(
        config: SimulationConfig,
        store: Arc<dyn MarketStore>,
        registry: Arc<ParameterRegistry>,
        models: Arc<ModelSet>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let run_id = config.run_id()?;
        let policy = config.selection.policy()?;

        let selection = config.backtest.model.to_selection();
        if let ModelSelection::Fixed { kind } = &selection {
            if !models.contains(kind) {
                return Err(SimulationError::UnknownModel(kind.clone()));
            }
        }

        let accessor = Arc::new(Accessor::connect(store, config.accessor.clone())?);
        let scorer = Scorer::new(
            registry,
            Arc::clone(&accessor),
            models,
            selection,
            config.scoring.scorer_options(),
        );

        let pools = match &config.pool.fixed {
            Some(path) => {
                let pool = load_pool(path)?;
                info!(path = %path.display(), members = pool.len(), "using fixed candidate pool");
                PoolPlan::Fixed(pool)
            }
            None => PoolPlan::Build {
                builder: PoolBuilder::new(Arc::clone(&accessor)),
                artifacts: config
                    .pool
                    .artifact_dir
                    .as_ref()
                    .map(|dir| PoolStore::new(dir.clone(), config.pool.encoding)),
            },
        };

        let workers = match config.scoring.threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("pitlab-score-{i}"))
                    .build()
                    .map_err(|e| SimulationError::ThreadPool(e.to_string()))?,
            ),
        };

        let portfolio = PortfolioState::new(config.backtest.initial_capital);
        Ok(Self {
            config,
            run_id,
            accessor,
            scorer,
            pools,
            policy,
            workers,
            cancel: CancelToken::new(),
            phase: Phase::Initialized,
            portfolio,
        })
    }

    /// Open the CSV store and registry named in `config.paths`.
    pub fn from_config(config: SimulationConfig) -> Result<Self, SimulationError> {
        let store = CsvStore::open(&config.paths.data_dir, &CsvStoreOptions::default())?;
        let registry = ParameterRegistry::from_csv_path(&config.paths.registry)?;
        Self::new(config, Arc::new(store), Arc::new(registry), Arc::new(ModelSet::standard()))
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run every period and return the report. Runs once.
    pub fn run(&mut self) -> Result<BacktestReport, SimulationError> {
        if self.phase != Phase::Initialized {
            return Err(SimulationError::Finalized);
        }
        let b = &self.config.backtest;
        let periods = calendar::periods(b.start, b.end, b.rebalance);
        info!(
            run_id = %self.run_id,
            periods = periods.len(),
            model = %self.scorer.selection().label(),
            selection = %self.policy.label(),
            "starting simulation"
        );

        let mut entries = Vec::with_capacity(periods.len());
        let mut status = RunStatus::Completed;
        for period in &periods {
            if self.cancel.is_cancelled() {
                warn!(period = period.index, "cancelled between periods");
                status = RunStatus::Aborted;
                break;
            }
            match self.run_period(period)? {
                PeriodOutcome::Finished { mut entry, update } => {
                    entry.nav = self.portfolio.commit(update);
                    info!(
                        period = period.index,
                        boundary = %period.boundary,
                        status = %entry.status,
                        positions = entry.positions.len(),
                        period_return = entry.period_return,
                        nav = entry.nav,
                        "period committed"
                    );
                    entries.push(entry);
                }
                PeriodOutcome::Cancelled => {
                    warn!(period = period.index, "cancelled mid-period; period discarded");
                    status = RunStatus::Aborted;
                    break;
                }
            }
        }
        self.transition(Phase::Finalized)?;

        let b = &self.config.backtest;
        let summary =
            SummaryStatistics::compute(&entries, b.initial_capital, b.rebalance.periods_per_year());
        info!(
            run_id = %self.run_id,
            cumulative_return = summary.cumulative_return,
            failed_periods = summary.failed_periods,
            "simulation finished"
        );
        Ok(BacktestReport {
            schema_version: SCHEMA_VERSION,
            run_id: self.run_id.clone(),
            model: self.scorer.selection().label().to_string(),
            selection: self.policy.label(),
            rebalance: b.rebalance,
            start: b.start,
            end: b.end,
            initial_capital: b.initial_capital,
            status,
            periods: entries,
            summary,
        })
    }

    fn transition(&mut self, next: Phase) -> Result<(), SimulationError> {
        if !self.phase.can_transition_to(next) {
            return Err(SimulationError::IllegalTransition { from: self.phase, to: next });
        }
        self.phase = next;
        Ok(())
    }

    fn run_period(&mut self, period: &Period) -> Result<PeriodOutcome, SimulationError> {
        let mut entry = PeriodEntry {
            index: period.index,
            boundary: period.boundary,
            as_of: None,
            exit_date: None,
            pool_hash: None,
            candidates: 0,
            scored: 0,
            positions: Vec::new(),
            exclusions: Vec::new(),
            cash_weight: 1.0,
            period_return: 0.0,
            benchmark_return: None,
            nav: 0.0,
            status: PeriodStatus::Uninvested,
        };

        // ── BuildingPool ──
        self.transition(Phase::BuildingPool)?;
        let calendar_id = self.config.backtest.benchmark.clone();
        let dates = self
            .accessor
            .last_trading_day(calendar_id.as_ref(), period.boundary)
            .and_then(|as_of| {
                let exit =
                    self.accessor.last_trading_day(calendar_id.as_ref(), period.next_boundary)?;
                Ok((as_of, exit))
            });
        let (as_of, exit_date) = match dates {
            Ok(dates) => dates,
            Err(e) => return self.fail(entry, period.boundary, format!("trading calendar: {e}")),
        };
        entry.as_of = Some(as_of);
        entry.exit_date = Some(exit_date);

        let pool = match self.pool_for(as_of) {
            Ok(pool) => pool,
            Err(e) => return self.fail(entry, as_of, format!("candidate pool: {e}")),
        };
        entry.pool_hash = Some(pool.content_hash());
        entry.candidates = pool.len();

        // ── Scoring ──
        self.transition(Phase::Scoring)?;
        let results = self.score_all(&pool, as_of);
        let unavailable = results.iter().find_map(|r| match &r.failure {
            Some(ScoreFailure::AccessorUnavailable { detail }) => Some((&r.equity_id, detail)),
            _ => None,
        });
        if let Some((id, detail)) = unavailable {
            let reason = format!("accessor unavailable while scoring {id}: {detail}");
            return self.fail(entry, as_of, reason);
        }
        if self.cancel.is_cancelled() {
            return Ok(PeriodOutcome::Cancelled);
        }

        let mut scored = Vec::with_capacity(results.len());
        for r in results {
            match r.failure.clone() {
                None => scored.push(r),
                Some(failure) => {
                    debug!(
                        equity = %r.equity_id,
                        %as_of,
                        reason = %failure,
                        "excluded from ranking"
                    );
                    entry.exclusions.push(Exclusion {
                        equity_id: r.equity_id,
                        reason: ExclusionReason::Scoring(failure),
                    });
                }
            }
        }
        entry.scored = scored.len();

        // ── Selecting ──
        self.transition(Phase::Selecting)?;
        let ranked = selection::rank(scored);
        let chosen = selection::select(&ranked, &self.policy);
        if chosen.is_empty() {
            debug!(period = period.index, %as_of, "nothing selected");
            self.transition(Phase::Reporting)?;
            return Ok(PeriodOutcome::Finished { entry, update: PeriodUpdate::cash(as_of) });
        }

        // ── Realizing ──
        self.transition(Phase::Realizing)?;
        let staleness = self.config.backtest.max_price_staleness_days;
        let mut priced = Vec::with_capacity(chosen.len());
        for score in chosen {
            let id = &score.equity_id;
            let prices = self.accessor.close_on_or_before(id, as_of, staleness).and_then(|bar| {
                // a close on or before the decision date is no exit price
                let exit_bar = self
                    .accessor
                    .close_on_or_before(id, exit_date, staleness)?
                    .filter(|exit| exit.date > as_of);
                Ok((bar, exit_bar))
            });
            match prices {
                Ok((Some(entry_bar), Some(exit_bar))) => {
                    priced.push(Priced { score, entry: entry_bar, exit: exit_bar })
                }
                Ok((entry_bar, _)) => {
                    let leg = match entry_bar {
                        None => PriceLeg::Entry,
                        Some(_) => PriceLeg::Exit,
                    };
                    debug!(equity = %id, %as_of, ?leg, "missing price; position dropped");
                    entry.exclusions.push(Exclusion {
                        equity_id: id.clone(),
                        reason: ExclusionReason::MissingPrice { leg },
                    });
                }
                Err(e) => return self.fail(entry, as_of, format!("prices for {id}: {e}")),
            }
        }
        entry.benchmark_return = self.benchmark_return(as_of, exit_date);

        let (positions, held) = self.realize(&priced);
        let invested: f64 = positions.iter().map(|p| p.weight).sum();
        entry.period_return = positions.iter().map(|p| p.weight * p.net_return).sum();
        entry.cash_weight = 1.0 - invested;
        entry.status = if positions.is_empty() {
            PeriodStatus::Uninvested
        } else {
            PeriodStatus::Invested
        };
        entry.positions = positions;

        if self.cancel.is_cancelled() {
            return Ok(PeriodOutcome::Cancelled);
        }

        // ── Reporting ──
        self.transition(Phase::Reporting)?;
        let update = PeriodUpdate {
            as_of,
            positions: held,
            cash_weight: entry.cash_weight,
            period_return: entry.period_return,
        };
        Ok(PeriodOutcome::Finished { entry, update })
    }

    /// Record the period as failed and move on with an all-cash update.
    fn fail(
        &mut self,
        mut entry: PeriodEntry,
        as_of: NaiveDate,
        reason: String,
    ) -> Result<PeriodOutcome, SimulationError> {
        warn!(period = entry.index, boundary = %entry.boundary, %reason, "period failed");
        self.transition(Phase::Reporting)?;
        entry.positions.clear();
        entry.period_return = 0.0;
        entry.cash_weight = 1.0;
        entry.status = PeriodStatus::Failed { reason };
        Ok(PeriodOutcome::Finished { entry, update: PeriodUpdate::cash(as_of) })
    }

    fn pool_for(&self, as_of: NaiveDate) -> Result<CandidatePool, PoolError> {
        let criteria = &self.config.pool.criteria;
        match &self.pools {
            PoolPlan::Fixed(pool) => Ok(pool.clone()),
            PoolPlan::Build { builder, artifacts: Some(store) } => {
                store.load_or_build(builder, as_of, criteria, self.config.pool.rebuild)
            }
            PoolPlan::Build { builder, artifacts: None } => builder.build(as_of, criteria),
        }
    }

    /// Score every pool member, ordered by equity id.
    fn score_all(&self, pool: &CandidatePool, as_of: NaiveDate) -> Vec<ScoreResult> {
        let ids: Vec<EquityId> = pool.ids().cloned().collect();
        let scorer = &self.scorer;
        let score = |id: &EquityId| scorer.score(id, as_of);
        let mut results: Vec<ScoreResult> = match &self.workers {
            Some(workers) => workers.install(|| ids.par_iter().map(score).collect::<Vec<_>>()),
            None => ids.par_iter().map(score).collect(),
        };
        results.sort_by(|a, b| a.equity_id.cmp(&b.equity_id));
        results
    }

    fn realize(&self, priced: &[Priced<'_>]) -> (Vec<PositionRecord>, Vec<HeldPosition>) {
        let scores: Vec<&ScoreResult> = priced.iter().map(|p| p.score).collect();
        let weights = selection::weights(
            &scores,
            self.config.selection.weighting,
            self.config.selection.max_single_weight,
        );
        let costs = &self.config.costs;
        let mut records = Vec::with_capacity(priced.len());
        let mut held = Vec::with_capacity(priced.len());
        for (p, weight) in priced.iter().zip(weights) {
            records.push(PositionRecord {
                equity_id: p.score.equity_id.clone(),
                model_kind: p.score.model_kind.clone(),
                growth_rate: p.score.growth_rate,
                confidence: p.score.confidence,
                weight,
                entry_date: p.entry.date,
                entry_price: p.entry.close,
                exit_date: p.exit.date,
                exit_price: p.exit.close,
                gross_return: p.exit.close / p.entry.close - 1.0,
                net_return: costs.net_return(p.entry.close, p.exit.close),
            });
            held.push(HeldPosition {
                equity_id: p.score.equity_id.clone(),
                entry_date: p.entry.date,
                entry_price: p.entry.close,
                weight,
            });
        }
        (records, held)
    }

    fn benchmark_return(&self, as_of: NaiveDate, exit_date: NaiveDate) -> Option<f64> {
        let id = self.config.backtest.benchmark.as_ref()?;
        let staleness = self.config.backtest.max_price_staleness_days;
        let close = |date: NaiveDate| match self.accessor.close_on_or_before(id, date, staleness) {
            Ok(bar) => bar,
            Err(e) => {
                warn!(benchmark = %id, %date, error = %e, "benchmark price unavailable");
                None
            }
        };
        let start = close(as_of)?;
        let end = close(exit_date).filter(|bar| bar.date > as_of)?;
        Some(end.close / start.close - 1.0)
    }
}
