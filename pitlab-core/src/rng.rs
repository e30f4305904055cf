//! Deterministic RNG hierarchy.
//!
//! A model's `random_state` is expanded into per-(equity, as-of, stream)
//! sub-seeds via BLAKE3, so a score never depends on which thread computed it
//! or on the order equities were visited.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::domain::EquityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for one (equity, as-of, stream). Independent of call order.
    pub fn sub_seed(&self, equity_id: &EquityId, as_of: NaiveDate, stream: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(equity_id.as_str().as_bytes());
        hasher.update(as_of.to_string().as_bytes());
        hasher.update(&stream.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn rng_for(&self, equity_id: &EquityId, as_of: NaiveDate, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(equity_id, as_of, stream))
    }
}
