//! Report export: JSON, positions CSV and periods CSV.
//!
//! The JSON form round-trips and carries `schema_version`; newer versions are
//! rejected on import. Files are written atomically (temp file, then rename).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::report::{BacktestReport, PeriodStatus, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a report to pretty JSON.
pub fn export_json(report: &BacktestReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize BacktestReport to JSON")
}

/// Deserialize a report, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestReport> {
    let json = json.trim_start_matches('\u{feff}');
    let report: BacktestReport =
        serde_json::from_str(json).context("failed to deserialize BacktestReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// One row per realized position.
///
/// Columns: period, as_of, exit_date, equity_id, model_kind, growth_rate,
/// confidence, weight, entry_price, exit_price, gross_return, net_return
pub fn export_positions_csv(report: &BacktestReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "period",
        "as_of",
        "exit_date",
        "equity_id",
        "model_kind",
        "growth_rate",
        "confidence",
        "weight",
        "entry_price",
        "exit_price",
        "gross_return",
        "net_return",
    ])?;
    for (period, p) in report.positions() {
        wtr.write_record([
            period.index.to_string(),
            p.entry_date.to_string(),
            p.exit_date.to_string(),
            p.equity_id.to_string(),
            p.model_kind.to_string(),
            format!("{:.6}", p.growth_rate),
            format!("{:.6}", p.confidence),
            format!("{:.6}", p.weight),
            format!("{:.4}", p.entry_price),
            format!("{:.4}", p.exit_price),
            format!("{:.6}", p.gross_return),
            format!("{:.6}", p.net_return),
        ])?;
    }
    finish(wtr)
}

/// One row per period.
///
/// Columns: period, boundary, as_of, exit_date, status, reason, candidates,
/// scored, positions, excluded, cash_weight, period_return, benchmark_return, nav
pub fn export_periods_csv(report: &BacktestReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "period",
        "boundary",
        "as_of",
        "exit_date",
        "status",
        "reason",
        "candidates",
        "scored",
        "positions",
        "excluded",
        "cash_weight",
        "period_return",
        "benchmark_return",
        "nav",
    ])?;
    let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
    for p in &report.periods {
        let (status, reason) = match &p.status {
            PeriodStatus::Failed { reason } => ("failed", reason.as_str()),
            PeriodStatus::Invested => ("invested", ""),
            PeriodStatus::Uninvested => ("uninvested", ""),
        };
        wtr.write_record([
            p.index.to_string(),
            p.boundary.to_string(),
            date(p.as_of),
            date(p.exit_date),
            status.to_string(),
            reason.to_string(),
            p.candidates.to_string(),
            p.scored.to_string(),
            p.positions.len().to_string(),
            p.exclusions.len().to_string(),
            format!("{:.6}", p.cash_weight),
            format!("{:.6}", p.period_return),
            p.benchmark_return.map(|r| format!("{r:.6}")).unwrap_or_default(),
            format!("{:.2}", p.nav),
        ])?;
    }
    finish(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

// ─── Files ──────────────────────────────────────────────────────────

/// Paths written by [`write_report`].
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub report_json: PathBuf,
    pub positions_csv: PathBuf,
    pub periods_csv: PathBuf,
}

/// Write `report.json`, `positions.csv` and `periods.csv` under
/// `output_dir/<run id prefix>/`.
pub fn write_report(output_dir: &Path, report: &BacktestReport) -> Result<ReportPaths> {
    let prefix: String = report.run_id.chars().take(12).collect();
    let dir = output_dir.join(format!("run_{prefix}"));
    fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;

    let paths = ReportPaths {
        report_json: dir.join("report.json"),
        positions_csv: dir.join("positions.csv"),
        periods_csv: dir.join("periods.csv"),
    };
    write_atomic(&paths.report_json, &export_json(report)?)?;
    write_atomic(&paths.positions_csv, &export_positions_csv(report)?)?;
    write_atomic(&paths.periods_csv, &export_periods_csv(report)?)?;
    info!(dir = %dir.display(), periods = report.periods.len(), "wrote backtest report");
    Ok(paths)
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).with_context(|| format!("cannot write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("cannot move {} into place", path.display()))
}
