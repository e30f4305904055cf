//! Simulated portfolio state.
//!
//! Only the simulator owns a [`PortfolioState`], and it changes only through
//! [`PortfolioState::commit`], which applies a fully built [`PeriodUpdate`]
//! in one step. A period that is abandoned simply drops its update.

use chrono::NaiveDate;
use pitlab_core::domain::EquityId;
use serde::{Deserialize, Serialize};

/// A position held over one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub equity_id: EquityId,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub weight: f64,
}

/// Everything a period changes, staged before commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodUpdate {
    pub as_of: NaiveDate,
    pub positions: Vec<HeldPosition>,
    /// Fraction of NAV left uninvested.
    pub cash_weight: f64,
    /// Return on NAV over the period, after costs. Cash earns nothing.
    pub period_return: f64,
}

impl PeriodUpdate {
    /// All-cash update for an uninvested or failed period.
    pub fn cash(as_of: NaiveDate) -> Self {
        Self { as_of, positions: Vec::new(), cash_weight: 1.0, period_return: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub as_of: Option<NaiveDate>,
    pub positions: Vec<HeldPosition>,
    pub cash_weight: f64,
    pub initial_capital: f64,
    pub nav: f64,
    pub peak_nav: f64,
    pub commits: usize,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            as_of: None,
            positions: Vec::new(),
            cash_weight: 1.0,
            initial_capital,
            nav: initial_capital,
            peak_nav: initial_capital,
            commits: 0,
        }
    }

    /// Apply a period. Returns the NAV after the period.
    pub fn commit(&mut self, update: PeriodUpdate) -> f64 {
        self.nav *= 1.0 + update.period_return;
        self.peak_nav = self.peak_nav.max(self.nav);
        self.as_of = Some(update.as_of);
        self.positions = update.positions;
        self.cash_weight = update.cash_weight;
        self.commits += 1;
        self.nav
    }

    pub fn cumulative_return(&self) -> f64 {
        if self.initial_capital > 0.0 {
            self.nav / self.initial_capital - 1.0
        } else {
            0.0
        }
    }

    /// Current drawdown from the running peak, as a non-positive fraction.
    pub fn drawdown(&self) -> f64 {
        if self.peak_nav > 0.0 {
            self.nav / self.peak_nav - 1.0
        } else {
            0.0
        }
    }
}
