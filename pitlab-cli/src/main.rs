//! pitlab CLI: backtests, candidate pools and registry checks.
//!
//! Commands:
//! - `run`: execute a walk-forward backtest from a TOML config
//! - `pool build`: build a candidate pool as of a date and write it as JSON
//! - `pool filter`: narrow an existing pool to a list of equities
//! - `pool merge`: union two pools
//! - `registry check`: load a tuned-parameter file and summarize it

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pitlab_core::pool::{
    filter, load_pool, merge, write_pool, ConflictPolicy, JsonEncoding, PoolBuilder, PoolCriteria,
    WriteMode,
};
use pitlab_core::store::{CsvStore, CsvStoreOptions};
use pitlab_core::{Accessor, AccessorOptions, EquityId, ModelKind, ParameterRegistry};
use pitlab_runner::{
    write_report, BacktestReport, ModelChoice, MonthlySimulator, RebalanceFrequency, RunStatus,
    SimulationConfig,
};

#[derive(Parser)]
#[command(name = "pitlab", about = "pitlab: point-in-time growth-model backtesting")]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a walk-forward backtest from a TOML config file.
    Run {
        /// Path to the TOML config.
        config: PathBuf,

        /// Model kind, or "best" for each equity's best-scoring tuned kind.
        #[arg(long)]
        model: Option<String>,

        /// Hold the K highest-growth equities.
        #[arg(long, conflicts_with = "threshold")]
        top_k: Option<usize>,

        /// Hold every equity with growth at or above this value.
        #[arg(long)]
        threshold: Option<f64>,

        /// monthly or quarterly.
        #[arg(long)]
        rebalance: Option<RebalanceFrequency>,

        /// First date of the backtest (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date of the backtest (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Directory for the report files.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Candidate pool commands.
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },
    /// Tuned-parameter registry commands.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
}

#[derive(Subcommand)]
enum PoolAction {
    /// Build a pool from the market data directory.
    Build {
        /// As-of date (YYYY-MM-DD).
        #[arg(long)]
        as_of: NaiveDate,

        /// Market data directory.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Output file.
        #[arg(long)]
        output: PathBuf,

        /// Minimum bars on or before the as-of date.
        #[arg(long)]
        min_history: Option<usize>,

        /// Restrict to these venues (repeatable).
        #[arg(long = "venue")]
        venues: Vec<String>,

        /// Replace an existing output file.
        #[arg(long, default_value_t = false)]
        overwrite: bool,

        /// Escape non-ASCII characters in the JSON.
        #[arg(long, default_value_t = false)]
        ascii: bool,
    },
    /// Keep only the listed equities of an existing pool.
    Filter {
        input: PathBuf,

        /// Equity codes to keep.
        #[arg(long, required = true, num_args = 1..)]
        keep: Vec<String>,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = false)]
        overwrite: bool,

        #[arg(long, default_value_t = false)]
        ascii: bool,
    },
    /// Union two pools; shared members come from the later pool.
    Merge {
        left: PathBuf,
        right: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Resolve shared members from the earlier pool instead.
        #[arg(long, default_value_t = false)]
        keep_earliest: bool,

        #[arg(long, default_value_t = false)]
        overwrite: bool,

        #[arg(long, default_value_t = false)]
        ascii: bool,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Load a tuned-parameter CSV and report entries per model kind.
    Check {
        #[arg(default_value = "data/tuned_parameters.csv")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { config, model, top_k, threshold, rebalance, start, end, output_dir } => {
            let overrides =
                RunOverrides { model, top_k, threshold, rebalance, start, end, output_dir };
            run_backtest_cmd(&config, overrides)
        }
        Commands::Pool { action } => match action {
            PoolAction::Build {
                as_of,
                data_dir,
                output,
                min_history,
                venues,
                overwrite,
                ascii,
            } => run_pool_build(
                as_of,
                &data_dir,
                &output,
                min_history,
                venues,
                write_mode(overwrite),
                encoding(ascii),
            ),
            PoolAction::Filter { input, keep, output, overwrite, ascii } => {
                run_pool_filter(&input, &keep, &output, write_mode(overwrite), encoding(ascii))
            }
            PoolAction::Merge { left, right, output, keep_earliest, overwrite, ascii } => {
                let policy = if keep_earliest {
                    ConflictPolicy::KeepEarliest
                } else {
                    ConflictPolicy::KeepLatest
                };
                let (mode, enc) = (write_mode(overwrite), encoding(ascii));
                run_pool_merge(&left, &right, &output, policy, mode, enc)
            }
        },
        Commands::Registry { action } => match action {
            RegistryAction::Check { path } => run_registry_check(&path),
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn write_mode(overwrite: bool) -> WriteMode {
    if overwrite {
        WriteMode::Overwrite
    } else {
        WriteMode::CreateNew
    }
}

fn encoding(ascii: bool) -> JsonEncoding {
    if ascii {
        JsonEncoding::Ascii
    } else {
        JsonEncoding::Utf8
    }
}

// ─── run ────────────────────────────────────────────────────────────

struct RunOverrides {
    model: Option<String>,
    top_k: Option<usize>,
    threshold: Option<f64>,
    rebalance: Option<RebalanceFrequency>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output_dir: Option<PathBuf>,
}

impl RunOverrides {
    fn apply(self, config: &mut SimulationConfig) {
        if let Some(model) = self.model {
            config.backtest.model = if model.eq_ignore_ascii_case("best") {
                ModelChoice::Best { best: true }
            } else {
                ModelChoice::Kind(ModelKind::new(&model))
            };
        }
        if let Some(k) = self.top_k {
            config.selection.top_k = Some(k);
            config.selection.threshold = None;
        }
        if let Some(t) = self.threshold {
            config.selection.threshold = Some(t);
            config.selection.top_k = None;
        }
        if let Some(r) = self.rebalance {
            config.backtest.rebalance = r;
        }
        if let Some(s) = self.start {
            config.backtest.start = s;
        }
        if let Some(e) = self.end {
            config.backtest.end = e;
        }
        if let Some(dir) = self.output_dir {
            config.paths.output_dir = dir;
        }
    }
}

fn run_backtest_cmd(config_path: &Path, overrides: RunOverrides) -> Result<()> {
    let mut config = SimulationConfig::from_toml_path(config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let output_dir = config.paths.output_dir.clone();
    let mut sim = MonthlySimulator::from_config(config).context("cannot start simulation")?;
    info!(run_id = %sim.run_id(), "simulator ready");
    let report = sim.run().context("simulation failed")?;

    let paths = write_report(&output_dir, &report)?;
    print_summary(&report);
    println!();
    println!("Report:    {}", paths.report_json.display());
    println!("Positions: {}", paths.positions_csv.display());
    println!("Periods:   {}", paths.periods_csv.display());
    Ok(())
}

fn print_summary(report: &BacktestReport) {
    let s = &report.summary;
    let status = match report.status {
        RunStatus::Completed => "completed",
        RunStatus::Aborted => "aborted",
    };
    println!("Run {} ({status})", report.run_id);
    println!(
        "  {} .. {}  model={}  selection={}  rebalance={}",
        report.start, report.end, report.model, report.selection, report.rebalance
    );
    println!(
        "  periods: {} invested, {} uninvested, {} failed; {} positions",
        s.invested_periods, s.uninvested_periods, s.failed_periods, s.total_positions
    );
    println!("  cumulative return: {:>8.2}%", s.cumulative_return * 100.0);
    println!("  annualized return: {:>8.2}%", s.annualized_return * 100.0);
    println!("  max drawdown:      {:>8.2}%", s.max_drawdown * 100.0);
    println!("  sharpe:            {:>8.2}", s.sharpe);
    println!("  hit rate:          {:>8.2}%", s.hit_rate * 100.0);
    if let (Some(b), Some(x)) = (s.benchmark_cumulative_return, s.excess_return) {
        println!("  benchmark:         {:>8.2}%  (excess {:+.2}%)", b * 100.0, x * 100.0);
    }
    println!("  final NAV:         {:.2}", s.final_nav);
}

// ─── pool ───────────────────────────────────────────────────────────

fn run_pool_build(
    as_of: NaiveDate,
    data_dir: &Path,
    output: &Path,
    min_history: Option<usize>,
    venues: Vec<String>,
    mode: WriteMode,
    encoding: JsonEncoding,
) -> Result<()> {
    let store = CsvStore::open(data_dir, &CsvStoreOptions::default())
        .with_context(|| format!("cannot open market data in {}", data_dir.display()))?;
    let accessor = Accessor::connect(Arc::new(store), AccessorOptions::default())?;

    let mut criteria = PoolCriteria::default();
    if let Some(n) = min_history {
        criteria.min_price_history = n;
    }
    criteria.universe.venues = venues.iter().map(pitlab_core::domain::Venue::new).collect();

    let pool = PoolBuilder::new(Arc::new(accessor)).build(as_of, &criteria)?;
    write_pool(output, &pool, mode, encoding)?;
    println!("{} members as of {as_of} -> {}", pool.len(), output.display());
    if let Some(rate) = pool.qualification_rate() {
        println!("{} rejected, {:.1}% qualified", pool.rejected().len(), rate * 100.0);
    }
    println!("content hash: {}", pool.content_hash());
    Ok(())
}

fn run_pool_filter(
    input: &Path,
    keep: &[String],
    output: &Path,
    mode: WriteMode,
    encoding: JsonEncoding,
) -> Result<()> {
    let pool = load_pool(input).with_context(|| format!("cannot load {}", input.display()))?;
    let keep = parse_ids(keep)?;
    let narrowed = filter(&pool, &keep);
    write_pool(output, &narrowed, mode, encoding)?;
    println!("{} of {} members kept -> {}", narrowed.len(), pool.len(), output.display());
    Ok(())
}

fn run_pool_merge(
    left: &Path,
    right: &Path,
    output: &Path,
    policy: ConflictPolicy,
    mode: WriteMode,
    encoding: JsonEncoding,
) -> Result<()> {
    let a = load_pool(left).with_context(|| format!("cannot load {}", left.display()))?;
    let b = load_pool(right).with_context(|| format!("cannot load {}", right.display()))?;
    let merged = merge(&a, &b, policy);
    write_pool(output, &merged, mode, encoding)?;
    println!("{} + {} -> {} members -> {}", a.len(), b.len(), merged.len(), output.display());
    Ok(())
}

fn parse_ids(codes: &[String]) -> Result<BTreeSet<EquityId>> {
    let ids = codes
        .iter()
        .map(|c| EquityId::new(c.as_str()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if ids.is_empty() {
        bail!("no equity codes given");
    }
    Ok(ids)
}

// ─── registry ───────────────────────────────────────────────────────

fn run_registry_check(path: &Path) -> Result<()> {
    let registry = ParameterRegistry::from_csv_path(path)
        .with_context(|| format!("cannot load registry {}", path.display()))?;
    println!("{}: {} entries", path.display(), registry.len());
    for (kind, count) in registry.kinds() {
        println!("  {:<16} {count:>6}", kind.as_str());
    }
    Ok(())
}
