//! Ranking, selection and weighting of scored candidates.
//!
//! Ranking is a total order: growth descending, then confidence descending,
//! then equity id ascending. Floats compare with `total_cmp`, so the order
//! never depends on the input order or on how scoring was parallelized.

use pitlab_core::domain::ScoreResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How many ranked candidates become positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionPolicy {
    /// The `k` best-ranked candidates.
    TopK { k: usize },
    /// Every candidate whose growth estimate is at least `min_growth`,
    /// optionally capped to the best `max_positions`.
    Threshold { min_growth: f64, max_positions: Option<usize> },
}

impl SelectionPolicy {
    pub fn label(&self) -> String {
        match self {
            Self::TopK { k } => format!("top-{k}"),
            Self::Threshold { min_growth, max_positions: None } => format!("growth>={min_growth}"),
            Self::Threshold { min_growth, max_positions: Some(n) } => {
                format!("growth>={min_growth} (max {n})")
            }
        }
    }
}

/// How selected positions share the invested capital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingPolicy {
    #[default]
    Equal,
    /// Proportional to confidence.
    ConfidenceWeighted,
    /// Proportional to positive growth estimates.
    GrowthWeighted,
}

/// The ranking order.
pub fn compare(a: &ScoreResult, b: &ScoreResult) -> Ordering {
    b.growth_rate
        .total_cmp(&a.growth_rate)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.equity_id.cmp(&b.equity_id))
}

/// Sort scored results into ranking order.
pub fn rank(mut scored: Vec<ScoreResult>) -> Vec<ScoreResult> {
    scored.sort_by(compare);
    scored
}

/// The prefix of `ranked` chosen by `policy`.
pub fn select<'a>(ranked: &'a [ScoreResult], policy: &SelectionPolicy) -> &'a [ScoreResult] {
    let n = match *policy {
        SelectionPolicy::TopK { k } => k.min(ranked.len()),
        SelectionPolicy::Threshold { min_growth, max_positions } => {
            // ranked by growth descending, so qualifying results form a prefix
            let qualifying = ranked.iter().take_while(|r| r.growth_rate >= min_growth).count();
            max_positions.map_or(qualifying, |cap| qualifying.min(cap))
        }
    };
    &ranked[..n]
}

/// Weights for `selected`, in the same order.
///
/// Weights sum to one before the cap. With `max_single_weight` each weight is
/// clipped and the clipped excess stays in cash, so the result may sum to
/// less than one. Degenerate proportional inputs (all zero) fall back to
/// equal weights.
pub fn weights(
    selected: &[&ScoreResult],
    policy: WeightingPolicy,
    max_single_weight: Option<f64>,
) -> Vec<f64> {
    if selected.is_empty() {
        return Vec::new();
    }
    let raw: Vec<f64> = match policy {
        WeightingPolicy::Equal => vec![1.0; selected.len()],
        WeightingPolicy::ConfidenceWeighted => {
            selected.iter().map(|r| r.confidence.max(0.0)).collect()
        }
        WeightingPolicy::GrowthWeighted => {
            selected.iter().map(|r| r.growth_rate.max(0.0)).collect()
        }
    };
    let total: f64 = raw.iter().sum();
    let normalized: Vec<f64> = if total > 0.0 && total.is_finite() {
        raw.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / selected.len() as f64; selected.len()]
    };
    match max_single_weight {
        Some(cap) => normalized.into_iter().map(|w| w.min(cap)).collect(),
        None => normalized,
    }
}
