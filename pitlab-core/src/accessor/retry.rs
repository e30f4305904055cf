//! Bounded retry with backoff for store calls.
//!
//! Delays are deterministic (no jitter): a rerun of the same backtest waits
//! the same way, which keeps timing-sensitive logs comparable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },

    /// `base_ms * factor^attempt`, capped at `max_ms`.
    Exponential { base_ms: u64, factor: f64, max_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential { base_ms: 200, factor: 2.0, max_ms: 3_000 }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { base_ms, factor, max_ms } => {
                let scaled = base_ms as f64 * factor.max(1.0).powi(attempt.min(30) as i32);
                Duration::from_millis(scaled.min(max_ms as f64) as u64)
            }
        }
    }
}

/// How many times a transient failure is tried before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero behaves like one.
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Backoff::default() }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, backoff: Backoff::Fixed { delay_ms: 0 } }
    }

    /// `max_attempts` tries with no delay in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, backoff: Backoff::Fixed { delay_ms: 0 } }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
