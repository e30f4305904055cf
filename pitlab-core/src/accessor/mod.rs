//! Point-in-time accessor over a [`MarketStore`].
//!
//! Every read the simulation makes goes through [`Accessor`]. It owns the
//! as-of discipline: fundamentals are cut at their publication date, prices at
//! the requested range, and backend output is normalized (sorted, one bar per
//! date) before anyone sees it. Transient store failures are retried with
//! backoff; a call that still fails surfaces as [`AccessorError::Unavailable`].

pub mod retry;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Equity, EquityId, FundamentalsSnapshot, PriceBar, Venue};
use crate::store::{MarketStore, StoreError};
pub use retry::{Backoff, RetryPolicy};

/// Accessor failures.
#[derive(Debug, Error)]
pub enum AccessorError {
    /// Transient failures persisted through every retry.
    #[error("{operation} unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The store returned a non-retryable error.
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Accessor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessorOptions {
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-call deadline. `None` calls the store inline.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// Monthly revenue periods kept in a snapshot.
    #[serde(default = "default_revenue_lookback")]
    pub revenue_lookback: usize,
}

fn default_revenue_lookback() -> usize {
    36
}

impl Default for AccessorOptions {
    fn default() -> Self {
        Self { retry: RetryPolicy::default(), call_timeout_ms: None, revenue_lookback: 36 }
    }
}

/// Declarative universe filter over equity reference data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseFilter {
    /// Exact code length, e.g. 4 for ordinary shares.
    #[serde(default)]
    pub code_length: Option<usize>,
    #[serde(default)]
    pub numeric_only: bool,
    #[serde(default)]
    pub exclude_etf: bool,
    /// Allowed venues. Empty allows all.
    #[serde(default)]
    pub venues: BTreeSet<Venue>,
}

impl UniverseFilter {
    pub fn matches(&self, equity: &Equity) -> bool {
        if let Some(len) = self.code_length {
            if equity.id.code_len() != len {
                return false;
            }
        }
        if self.numeric_only && !equity.id.is_numeric() {
            return false;
        }
        if self.exclude_etf && equity.is_etf {
            return false;
        }
        self.venues.is_empty() || self.venues.contains(&equity.venue)
    }
}

/// Read-only, point-in-time façade over a market store.
///
/// Cheap to share: wrap in an `Arc` and hand the same handle to every
/// component of a run.
pub struct Accessor {
    store: Arc<dyn MarketStore>,
    equities: BTreeMap<EquityId, Equity>,
    options: AccessorOptions,
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("store", &self.store.name())
            .field("equities", &self.equities.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Accessor {
    /// Acquire the store and load equity reference data once.
    pub fn connect(
        store: Arc<dyn MarketStore>,
        options: AccessorOptions,
    ) -> Result<Self, AccessorError> {
        let mut accessor = Self { store, equities: BTreeMap::new(), options };
        let equities = accessor.call("equities", |s| s.equities())?;
        accessor.equities = equities.into_iter().map(|e| (e.id.clone(), e)).collect();
        debug!(
            store = accessor.store.name(),
            equities = accessor.equities.len(),
            "accessor connected"
        );
        Ok(accessor)
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn options(&self) -> &AccessorOptions {
        &self.options
    }

    pub fn equity(&self, id: &EquityId) -> Option<&Equity> {
        self.equities.get(id)
    }

    pub fn equities(&self) -> impl Iterator<Item = &Equity> {
        self.equities.values()
    }

    /// Bars with `start <= date <= end`, strictly ascending by date.
    ///
    /// Duplicate dates from the backend collapse to the last row returned.
    pub fn price_history(
        &self,
        equity_id: &EquityId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, AccessorError> {
        if end < start {
            return Ok(Vec::new());
        }
        let id = equity_id.clone();
        let raw = self.call("price_history", move |s| s.prices(&id, start, end))?;
        let total = raw.len();
        let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
        for bar in raw.into_iter().filter(|b| b.date >= start && b.date <= end) {
            by_date.insert(bar.date, bar);
        }
        if by_date.len() != total {
            warn!(
                equity = %equity_id,
                returned = total,
                kept = by_date.len(),
                "store returned out-of-range or duplicate bars"
            );
        }
        Ok(by_date.into_values().collect())
    }

    /// Every bar on or before `as_of`.
    pub fn price_history_through(
        &self,
        equity_id: &EquityId,
        as_of: NaiveDate,
    ) -> Result<Vec<PriceBar>, AccessorError> {
        self.price_history(equity_id, NaiveDate::MIN, as_of)
    }

    /// Latest bar with a usable close within `max_staleness_days` before `date`.
    pub fn close_on_or_before(
        &self,
        equity_id: &EquityId,
        date: NaiveDate,
        max_staleness_days: i64,
    ) -> Result<Option<PriceBar>, AccessorError> {
        let start = date - ChronoDuration::days(max_staleness_days.max(0));
        let bars = self.price_history(equity_id, start, date)?;
        Ok(bars.into_iter().rev().find(|b| b.has_valid_close()))
    }

    /// Fundamentals known on `as_of`, or `None` when nothing is published yet.
    pub fn snapshot(
        &self,
        equity_id: &EquityId,
        as_of: NaiveDate,
    ) -> Result<Option<FundamentalsSnapshot>, AccessorError> {
        let id = equity_id.clone();
        let revenue = self.call("monthly_revenue", move |s| s.monthly_revenue(&id, as_of))?;
        let id = equity_id.clone();
        let ratios = self.call("ratios", move |s| s.ratios(&id, as_of))?;
        let id = equity_id.clone();
        let statements = self.call("statements", move |s| s.statements(&id, as_of))?;

        let leaked = revenue.iter().filter(|r| r.published > as_of).count()
            + ratios.iter().filter(|r| r.published > as_of).count()
            + statements.iter().filter(|r| r.published > as_of).count();
        if leaked > 0 {
            debug!(equity = %equity_id, %as_of, leaked, "dropping rows published after as-of");
        }

        Ok(FundamentalsSnapshot::assemble(
            equity_id.clone(),
            as_of,
            &revenue,
            &ratios,
            &statements,
            self.options.revenue_lookback,
        ))
    }

    /// Equities matching `filter` with at least one price on or before `as_of`,
    /// ascending by id.
    pub fn universe(
        &self,
        as_of: NaiveDate,
        filter: &UniverseFilter,
    ) -> Result<Vec<EquityId>, AccessorError> {
        let mut ids = Vec::new();
        for equity in self.equities.values().filter(|e| filter.matches(e)) {
            if !self.price_history_through(&equity.id, as_of)?.is_empty() {
                ids.push(equity.id.clone());
            }
        }
        Ok(ids)
    }

    /// The last trading day on or before `boundary`.
    ///
    /// With a calendar equity this is its last bar date no more than two weeks
    /// before the boundary; otherwise (or when it has no such bar) the last
    /// weekday.
    pub fn last_trading_day(
        &self,
        calendar: Option<&EquityId>,
        boundary: NaiveDate,
    ) -> Result<NaiveDate, AccessorError> {
        if let Some(id) = calendar {
            let bars = self.price_history(id, boundary - ChronoDuration::days(14), boundary)?;
            if let Some(last) = bars.last() {
                return Ok(last.date);
            }
            warn!(calendar = %id, %boundary, "calendar equity has no recent bar; using weekdays");
        }
        Ok(last_weekday(boundary))
    }

    fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, AccessorError>
    where
        T: Send + 'static,
        F: Fn(&dyn MarketStore) -> Result<T, StoreError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let attempts = self.options.retry.attempts();
        let mut attempt = 0;
        loop {
            let result = match self.options.call_timeout_ms {
                None => (*f)(self.store.as_ref()),
                Some(ms) => self.call_with_deadline(Duration::from_millis(ms), Arc::clone(&f)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(source) if source.is_transient() && attempt + 1 < attempts => {
                    let delay = self.options.retry.backoff.delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "transient store failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(source) if source.is_transient() => {
                    return Err(AccessorError::Unavailable { operation, attempts, source })
                }
                Err(source) => return Err(AccessorError::Store { operation, source }),
            }
        }
    }

    /// Run one store call on a helper thread and wait at most `limit`.
    ///
    /// A call that overruns keeps running detached; its result is dropped.
    fn call_with_deadline<T, F>(&self, limit: Duration, f: Arc<F>) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(&dyn MarketStore) -> Result<T, StoreError> + Send + Sync + 'static,
    {
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("pitlab-store-call".to_string())
            .spawn(move || {
                let _ = tx.send((*f)(store.as_ref()));
            })
            .map_err(|e| StoreError::Unavailable(format!("cannot spawn store call: {e}")))?;
        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(StoreError::Timeout { after_ms: limit.as_millis() as u64 })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(StoreError::Unavailable("store call aborted".to_string()))
            }
        }
    }
}

/// The latest Monday–Friday date on or before `date`.
pub fn last_weekday(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - ChronoDuration::days(1),
        Weekday::Sun => date - ChronoDuration::days(2),
        _ => date,
    }
}
