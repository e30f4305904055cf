//! Pure set operations over pools.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use super::{CandidatePool, PoolMetadata, PoolSource};
use crate::domain::EquityId;

/// Which side wins when both pools hold the same equity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The pool with the later as-of date; on a tie, the right-hand pool.
    KeepLatest,
    /// The pool with the earlier as-of date; on a tie, the left-hand pool.
    KeepEarliest,
}

/// Narrow `pool` to the members in `keep`.
///
/// The result keeps the parent's as-of date, criteria and timestamp and
/// records the parent's hash. Ids in `keep` that are not members are ignored.
pub fn filter(pool: &CandidatePool, keep: &BTreeSet<EquityId>) -> CandidatePool {
    let missing: Vec<&EquityId> = keep.iter().filter(|id| !pool.contains(id)).collect();
    if !missing.is_empty() {
        warn!(?missing, "requested equities are not in the parent pool");
    }
    let records = pool
        .records()
        .iter()
        .filter(|r| keep.contains(&r.equity_id))
        .cloned()
        .collect();
    let parent = pool.metadata();
    CandidatePool::new(
        records,
        PoolMetadata {
            source: PoolSource::Filtered {
                parent_hash: pool.content_hash(),
                parent_count: pool.len(),
            },
            as_of: parent.as_of,
            criteria: parent.criteria.clone(),
            generated_at: parent.generated_at,
            count: 0,
            kept: Some(keep.iter().cloned().collect()),
            rejected: Vec::new(),
        },
    )
}

/// Union of two pools, resolving shared members by `policy`.
///
/// The winning side also supplies the as-of date and criteria.
pub fn merge(left: &CandidatePool, right: &CandidatePool, policy: ConflictPolicy) -> CandidatePool {
    let right_wins = match policy {
        ConflictPolicy::KeepLatest => right.as_of() >= left.as_of(),
        ConflictPolicy::KeepEarliest => right.as_of() < left.as_of(),
    };
    let (loser, winner) = if right_wins {
        (left, right)
    } else {
        (right, left)
    };

    let mut members = BTreeMap::new();
    for r in loser.records().iter().chain(winner.records()) {
        members.insert(r.equity_id.clone(), r.clone());
    }

    CandidatePool::new(
        members.into_values().collect(),
        PoolMetadata {
            source: PoolSource::Merged {
                left_hash: left.content_hash(),
                right_hash: right.content_hash(),
                policy,
            },
            as_of: winner.as_of(),
            criteria: winner.metadata().criteria.clone(),
            generated_at: left.metadata().generated_at.max(right.metadata().generated_at),
            count: 0,
            kept: None,
            rejected: Vec::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::fixtures::{pool, record};
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn id(s: &str) -> EquityId {
        EquityId::new(s).unwrap()
    }

    #[test]
    fn filter_fifty_member_pool_to_two() {
        let codes: Vec<String> = (0..50).map(|i| format!("{}", 1100 + i * 7)).collect();
        let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
        let parent = pool(&refs, d(2024, 1, 31));
        assert_eq!(parent.len(), 50);

        let keep: BTreeSet<EquityId> = [id(&codes[40]), id(&codes[3])].into_iter().collect();
        let child = filter(&parent, &keep);

        let ids: Vec<&str> = child.ids().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec![codes[3].as_str(), codes[40].as_str()]);
        assert_eq!(child.metadata().count, 2);
        assert_eq!(child.metadata().criteria, parent.metadata().criteria);
        assert_eq!(child.as_of(), parent.as_of());
        match &child.metadata().source {
            PoolSource::Filtered { parent_hash, parent_count } => {
                assert_eq!(parent_hash, &parent.content_hash());
                assert_eq!(*parent_count, 50);
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn filter_ignores_unknown_ids() {
        let parent = pool(&["1101", "2330"], d(2024, 1, 31));
        let keep: BTreeSet<EquityId> = [id("2330"), id("9999")].into_iter().collect();
        let child = filter(&parent, &keep);
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn merge_keep_latest_prefers_newer_pool() {
        let old = pool(&["1101", "2330"], d(2024, 1, 31));
        let mut newer_records = vec![record("2330", 250), record("2454", 80)];
        newer_records[0].name = "updated".into();
        let mut meta = old.metadata().clone();
        meta.as_of = d(2024, 2, 29);
        let new = CandidatePool::new(newer_records, meta);

        // argument order does not matter for which record wins
        let forward = merge(&old, &new, ConflictPolicy::KeepLatest);
        let backward = merge(&new, &old, ConflictPolicy::KeepLatest);
        for merged in [forward, backward] {
            let ids: Vec<&str> = merged.ids().map(|i| i.as_str()).collect();
            assert_eq!(ids, vec!["1101", "2330", "2454"]);
            let tsmc = merged.records().iter().find(|r| r.equity_id.as_str() == "2330").unwrap();
            assert_eq!(tsmc.name, "updated");
            assert_eq!(merged.as_of(), d(2024, 2, 29));
        }

        let earliest = merge(&old, &new, ConflictPolicy::KeepEarliest);
        let tsmc = earliest.records().iter().find(|r| r.equity_id.as_str() == "2330").unwrap();
        assert_eq!(tsmc.price_history_len, 100);
    }

    #[test]
    fn merge_same_date_right_wins() {
        let a = pool(&["2330"], d(2024, 1, 31));
        let mut records = vec![record("2330", 1)];
        records[0].name = "right".into();
        let b = CandidatePool::new(records, a.metadata().clone());
        let merged = merge(&a, &b, ConflictPolicy::KeepLatest);
        assert_eq!(merged.records()[0].name, "right");
    }
}
