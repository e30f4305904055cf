//! Summary statistics: pure functions over a NAV curve and period returns.
//!
//! Unlike daily-bar metrics, everything here is periodic. Annualization uses
//! the rebalancing frequency (12 or 4 periods per year).

use serde::{Deserialize, Serialize};

use crate::report::{PeriodEntry, PeriodStatus};

/// Aggregate statistics for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub cumulative_return: f64,
    pub annualized_return: f64,
    /// Share of realized positions with a positive net return.
    pub hit_rate: f64,
    /// Share of invested periods with a positive return.
    pub period_win_rate: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub benchmark_cumulative_return: Option<f64>,
    pub excess_return: Option<f64>,
    pub invested_periods: usize,
    pub uninvested_periods: usize,
    pub failed_periods: usize,
    pub total_positions: usize,
    pub final_nav: f64,
}

impl SummaryStatistics {
    /// Compute from the period entries of a run.
    pub fn compute(periods: &[PeriodEntry], initial_capital: f64, periods_per_year: f64) -> Self {
        let mut nav_curve = Vec::with_capacity(periods.len() + 1);
        nav_curve.push(initial_capital);
        nav_curve.extend(periods.iter().map(|p| p.nav));

        let returns: Vec<f64> = periods.iter().map(|p| p.period_return).collect();
        let invested: Vec<f64> = periods
            .iter()
            .filter(|p| p.status == PeriodStatus::Invested)
            .map(|p| p.period_return)
            .collect();
        let position_returns: Vec<f64> =
            periods.iter().flat_map(|p| p.positions.iter().map(|pos| pos.net_return)).collect();

        let cumulative = total_return(&nav_curve);
        let benchmark = benchmark_return(periods);
        Self {
            cumulative_return: cumulative,
            annualized_return: annualized_return(&nav_curve, periods_per_year),
            hit_rate: positive_share(&position_returns),
            period_win_rate: positive_share(&invested),
            max_drawdown: max_drawdown(&nav_curve),
            sharpe: sharpe_ratio(&returns, periods_per_year),
            benchmark_cumulative_return: benchmark,
            excess_return: benchmark.map(|b| cumulative - b),
            invested_periods: invested.len(),
            uninvested_periods: periods
                .iter()
                .filter(|p| p.status == PeriodStatus::Uninvested)
                .count(),
            failed_periods: periods.iter().filter(|p| p.status.is_failed()).count(),
            total_positions: position_returns.len(),
            final_nav: nav_curve.last().copied().unwrap_or(initial_capital),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(nav_curve: &[f64]) -> f64 {
    match (nav_curve.first(), nav_curve.last()) {
        (Some(&initial), Some(&last)) if nav_curve.len() >= 2 && initial > 0.0 => {
            (last - initial) / initial
        }
        _ => 0.0,
    }
}

/// Compound annual return over `nav_curve.len() - 1` periods.
pub fn annualized_return(nav_curve: &[f64], periods_per_year: f64) -> f64 {
    let periods = nav_curve.len().saturating_sub(1);
    let (Some(&initial), Some(&last)) = (nav_curve.first(), nav_curve.last()) else {
        return 0.0;
    };
    if periods == 0 || initial <= 0.0 || last <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let years = periods as f64 / periods_per_year;
    (last / initial).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio of periodic returns, zero risk-free rate.
///
/// Returns 0.0 with fewer than two periods or zero variance.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean(returns) / std * periods_per_year.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(nav_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &nav in nav_curve {
        peak = peak.max(nav);
        if peak > 0.0 {
            max_dd = max_dd.min((nav - peak) / peak);
        }
    }
    max_dd
}

/// Fraction of values strictly above zero; 0.0 for an empty slice.
pub fn positive_share(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|&&v| v > 0.0).count() as f64 / values.len() as f64
}

/// Compounded benchmark return over the periods that report one.
fn benchmark_return(periods: &[PeriodEntry]) -> Option<f64> {
    let mut growth = 1.0;
    let mut seen = false;
    for r in periods.iter().filter_map(|p| p.benchmark_return) {
        growth *= 1.0 + r;
        seen = true;
    }
    seen.then(|| growth - 1.0)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}
