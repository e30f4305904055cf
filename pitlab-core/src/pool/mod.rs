//! Candidate pools: the scoreable subset of the universe on one as-of date.
//!
//! - [`PoolBuilder`] filters the universe into a pool
//! - [`filter`] and [`merge`] are pure set operations over pools
//! - [`PoolStore`] persists pools as immutable JSON artifacts
//!
//! A pool's identity is its content hash over (as-of, criteria, members). The
//! generation timestamp is provenance only and never part of the hash.

pub mod artifact;
pub mod builder;
pub mod ops;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::accessor::{AccessorError, UniverseFilter};
use crate::domain::{EquityId, Venue};
pub use artifact::{
    load_pool, pool_to_json, write_pool, JsonEncoding, PoolDocument, PoolStore, WriteMode,
};
pub use builder::PoolBuilder;
pub use ops::{filter, merge, ConflictPolicy};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Accessor(#[from] AccessorError),

    #[error("pool artifact already exists at {path} (pass overwrite to replace it)")]
    AlreadyExists { path: std::path::PathBuf },

    #[error("pool artifact {path} is marked unsuccessful")]
    UnsuccessfulArtifact { path: std::path::PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pool JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One pool member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(alias = "stock_id")]
    pub equity_id: EquityId,
    #[serde(default, alias = "stock_name")]
    pub name: String,
    #[serde(default = "unknown_venue", alias = "market")]
    pub venue: Venue,
    #[serde(default)]
    pub is_etf: bool,
    #[serde(default)]
    pub code_length: usize,
    /// Bars on or before the pool's as-of date.
    #[serde(default)]
    pub price_history_len: usize,
}

fn unknown_venue() -> Venue {
    Venue::new("UNKNOWN")
}

/// What qualifies an equity for a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCriteria {
    #[serde(flatten)]
    pub universe: UniverseFilter,
    /// Minimum bars on or before the as-of date.
    #[serde(default = "default_min_price_history")]
    pub min_price_history: usize,
    /// When non-empty, only these equities are considered.
    #[serde(default)]
    pub include: BTreeSet<EquityId>,
    #[serde(default)]
    pub exclude: BTreeSet<EquityId>,
}

fn default_min_price_history() -> usize {
    20
}

impl Default for PoolCriteria {
    /// Four-digit numeric ordinary shares, no funds, a month of trading.
    fn default() -> Self {
        Self {
            universe: UniverseFilter {
                code_length: Some(4),
                numeric_only: true,
                exclude_etf: true,
                venues: BTreeSet::new(),
            },
            min_price_history: default_min_price_history(),
            include: BTreeSet::new(),
            exclude: BTreeSet::new(),
        }
    }
}

impl PoolCriteria {
    /// Stable text form used for hashing and artifact names.
    pub fn canonical(&self) -> String {
        let join = |ids: &BTreeSet<EquityId>| {
            ids.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(",")
        };
        let venues: Vec<&str> = self.universe.venues.iter().map(|v| v.as_str()).collect();
        format!(
            "code_length={:?};numeric_only={};exclude_etf={};venues={};\
             min_price_history={};include={};exclude={}",
            self.universe.code_length,
            self.universe.numeric_only,
            self.universe.exclude_etf,
            venues.join(","),
            self.min_price_history,
            join(&self.include),
            join(&self.exclude),
        )
    }

    pub fn hash(&self) -> String {
        blake3::hash(self.canonical().as_bytes()).to_hex().to_string()
    }
}

/// How a pool came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolSource {
    /// Built from a store's universe.
    Universe { store: String },
    /// Narrowed from a parent pool.
    Filtered { parent_hash: String, parent_count: usize },
    /// Union of two pools.
    Merged { left_hash: String, right_hash: String, policy: ConflictPolicy },
    /// Loaded from a file written before pools carried metadata.
    Imported { file: String },
}

/// Why the builder left an equity out of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    Excluded,
    CodeLength { length: usize, required: usize },
    NonNumeric,
    Etf,
    Venue { venue: Venue },
    InsufficientHistory { available: usize, required: usize },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excluded => f.write_str("explicitly excluded"),
            Self::CodeLength { length, required } => {
                write!(f, "code length {length}, need {required}")
            }
            Self::NonNumeric => f.write_str("non-numeric code"),
            Self::Etf => f.write_str("fund"),
            Self::Venue { venue } => write!(f, "venue {venue} not allowed"),
            Self::InsufficientHistory { available, required } => {
                write!(f, "{available} bars, need {required}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEquity {
    #[serde(alias = "stock_id")]
    pub equity_id: EquityId,
    #[serde(flatten)]
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub source: PoolSource,
    pub as_of: NaiveDate,
    pub criteria: PoolCriteria,
    pub generated_at: NaiveDateTime,
    pub count: usize,
    /// Keep-set requested when the pool was filtered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kept: Option<Vec<EquityId>>,
    /// Screened equities the builder left out, in id order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedEquity>,
}

/// Ordered, immutable set of candidates plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePool {
    records: Vec<CandidateRecord>,
    metadata: PoolMetadata,
}

impl CandidatePool {
    /// Sorts by equity id and drops repeated ids (first wins).
    pub fn new(mut records: Vec<CandidateRecord>, mut metadata: PoolMetadata) -> Self {
        records.sort_by(|a, b| a.equity_id.cmp(&b.equity_id));
        records.dedup_by(|later, earlier| later.equity_id == earlier.equity_id);
        for r in &mut records {
            r.code_length = r.equity_id.code_len();
        }
        metadata.count = records.len();
        Self { records, metadata }
    }

    pub fn records(&self) -> &[CandidateRecord] {
        &self.records
    }

    pub fn metadata(&self) -> &PoolMetadata {
        &self.metadata
    }

    pub fn as_of(&self) -> NaiveDate {
        self.metadata.as_of
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EquityId> {
        self.records.iter().map(|r| &r.equity_id)
    }

    pub fn contains(&self, id: &EquityId) -> bool {
        self.records.binary_search_by(|r| r.equity_id.cmp(id)).is_ok()
    }

    pub fn rejected(&self) -> &[RejectedEquity] {
        &self.metadata.rejected
    }

    /// Members over screened equities. `None` when nothing was screened.
    pub fn qualification_rate(&self) -> Option<f64> {
        let screened = self.records.len() + self.metadata.rejected.len();
        (screened > 0).then(|| self.records.len() as f64 / screened as f64)
    }

    /// BLAKE3 over as-of, criteria and members.
    pub fn content_hash(&self) -> String {
        let mut h = blake3::Hasher::new();
        h.update(b"pitlab-pool-v1\n");
        h.update(self.metadata.as_of.to_string().as_bytes());
        h.update(b"\n");
        h.update(self.metadata.criteria.canonical().as_bytes());
        h.update(b"\n");
        for r in &self.records {
            let line = format!(
                "{}|{}|{}|{}\n",
                r.equity_id, r.venue, r.is_etf, r.price_history_len
            );
            h.update(line.as_bytes());
        }
        h.finalize().to_hex().to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn records_sorted_and_deduplicated() {
        let p = pool(&["2454", "1101", "2330", "1101"], d(2024, 1, 31));
        let ids: Vec<&str> = p.ids().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["1101", "2330", "2454"]);
        assert_eq!(p.metadata().count, 3);
        assert!(p.contains(&EquityId::new("2330").unwrap()));
    }

    #[test]
    fn content_hash_ignores_timestamp() {
        let a = pool(&["1101", "2330"], d(2024, 1, 31));
        let mut meta = a.metadata().clone();
        meta.generated_at = timestamp(17);
        let b = CandidatePool::new(a.records().to_vec(), meta);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_tracks_members_and_date() {
        let a = pool(&["1101", "2330"], d(2024, 1, 31));
        assert_ne!(a.content_hash(), pool(&["1101"], d(2024, 1, 31)).content_hash());
        assert_ne!(a.content_hash(), pool(&["1101", "2330"], d(2024, 2, 29)).content_hash());
    }

    #[test]
    fn criteria_hash_is_stable() {
        assert_eq!(PoolCriteria::default().hash(), PoolCriteria::default().hash());
        let mut other = PoolCriteria::default();
        other.exclude.insert(EquityId::new("2330").unwrap());
        assert_ne!(PoolCriteria::default().hash(), other.hash());
    }
}
