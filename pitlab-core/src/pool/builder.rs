//! Builds a candidate pool from the accessor's universe.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    CandidatePool, CandidateRecord, PoolCriteria, PoolError, PoolMetadata, PoolSource,
    RejectedEquity, RejectionReason,
};
use crate::accessor::Accessor;
use crate::domain::Equity;

#[derive(Debug, Clone)]
pub struct PoolBuilder {
    accessor: Arc<Accessor>,
}

impl PoolBuilder {
    pub fn new(accessor: Arc<Accessor>) -> Self {
        Self { accessor }
    }

    /// Build the pool for `as_of`, stamped with the current time.
    pub fn build(
        &self,
        as_of: NaiveDate,
        criteria: &PoolCriteria,
    ) -> Result<CandidatePool, PoolError> {
        self.build_at(as_of, criteria, Utc::now().naive_utc())
    }

    /// Build with an explicit generation timestamp.
    ///
    /// Members depend only on `as_of`, `criteria` and the store contents.
    pub fn build_at(
        &self,
        as_of: NaiveDate,
        criteria: &PoolCriteria,
        generated_at: NaiveDateTime,
    ) -> Result<CandidatePool, PoolError> {
        for id in &criteria.include {
            if self.accessor.equity(id).is_none() {
                warn!(equity = %id, "included equity has no reference data; ignored");
            }
        }

        let min_history = criteria.min_price_history.max(1);
        let mut records = Vec::new();
        let mut rejected = Vec::new();
        for equity in self.accessor.equities() {
            // Outside a non-empty include list an equity is never screened.
            if !criteria.include.is_empty() && !criteria.include.contains(&equity.id) {
                continue;
            }
            let reason = match screen(criteria, equity) {
                Some(reason) => Some(reason),
                None => {
                    let history = self.accessor.price_history_through(&equity.id, as_of)?.len();
                    if history < min_history {
                        Some(RejectionReason::InsufficientHistory {
                            available: history,
                            required: min_history,
                        })
                    } else {
                        records.push(CandidateRecord {
                            equity_id: equity.id.clone(),
                            name: equity.name.clone(),
                            venue: equity.venue.clone(),
                            is_etf: equity.is_etf,
                            code_length: equity.id.code_len(),
                            price_history_len: history,
                        });
                        None
                    }
                }
            };
            if let Some(reason) = reason {
                debug!(equity = %equity.id, %reason, "rejected from pool");
                rejected.push(RejectedEquity { equity_id: equity.id.clone(), reason });
            }
        }

        let pool = CandidatePool::new(
            records,
            PoolMetadata {
                source: PoolSource::Universe { store: self.accessor.store_name().to_string() },
                as_of,
                criteria: criteria.clone(),
                generated_at,
                count: 0,
                kept: None,
                rejected,
            },
        );
        info!(
            %as_of,
            members = pool.len(),
            rejected = pool.rejected().len(),
            hash = %pool.content_hash(),
            "built candidate pool"
        );
        Ok(pool)
    }
}

/// First reference-data check the equity fails, if any.
fn screen(criteria: &PoolCriteria, equity: &Equity) -> Option<RejectionReason> {
    let filter = &criteria.universe;
    if criteria.exclude.contains(&equity.id) {
        return Some(RejectionReason::Excluded);
    }
    if let Some(required) = filter.code_length {
        let length = equity.id.code_len();
        if length != required {
            return Some(RejectionReason::CodeLength { length, required });
        }
    }
    if filter.numeric_only && !equity.id.is_numeric() {
        return Some(RejectionReason::NonNumeric);
    }
    if filter.exclude_etf && equity.is_etf {
        return Some(RejectionReason::Etf);
    }
    if !filter.venues.is_empty() && !filter.venues.contains(&equity.venue) {
        return Some(RejectionReason::Venue { venue: equity.venue.clone() });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::AccessorOptions;
    use crate::domain::{EquityId, PriceBar, Venue};
    use crate::pool::fixtures::timestamp;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn id(s: &str) -> EquityId {
        EquityId::new(s).unwrap()
    }

    fn bars(days: i64) -> Vec<PriceBar> {
        (0..days).map(|i| PriceBar::flat(d(2024, 1, 1) + Duration::days(i), 10.0, 1)).collect()
    }

    fn builder() -> PoolBuilder {
        let mut store = MemoryStore::new();
        for (code, venue, etf, days) in [
            ("2330", "TWSE", false, 30),
            ("2317", "TWSE", false, 30),
            ("6488", "TPEX", false, 30),
            ("0050", "TWSE", true, 30),
            ("2881A", "TWSE", false, 30),
            ("1101", "TWSE", false, 5),
        ] {
            store.add_equity(Equity::new(id(code), code, Venue::new(venue), etf));
            store.add_bars(&id(code), bars(days));
        }
        let accessor = Accessor::connect(Arc::new(store), AccessorOptions::default()).unwrap();
        PoolBuilder::new(Arc::new(accessor))
    }

    fn codes(pool: &CandidatePool) -> Vec<String> {
        pool.ids().map(|i| i.to_string()).collect()
    }

    #[test]
    fn default_criteria_shape_filters() {
        let pool =
            builder().build_at(d(2024, 1, 31), &PoolCriteria::default(), timestamp(9)).unwrap();
        assert_eq!(codes(&pool), vec!["2317", "2330", "6488"]);
        assert_eq!(pool.records()[0].price_history_len, 30);
    }

    #[test]
    fn rejected_equities_carry_their_reason() {
        let pool =
            builder().build_at(d(2024, 1, 31), &PoolCriteria::default(), timestamp(9)).unwrap();
        let reasons: Vec<(String, RejectionReason)> = pool
            .rejected()
            .iter()
            .map(|r| (r.equity_id.to_string(), r.reason.clone()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("0050".to_string(), RejectionReason::Etf),
                (
                    "1101".to_string(),
                    RejectionReason::InsufficientHistory { available: 5, required: 20 }
                ),
                ("2881A".to_string(), RejectionReason::CodeLength { length: 5, required: 4 }),
            ]
        );
        assert_eq!(pool.qualification_rate(), Some(0.5));
    }

    #[test]
    fn excluded_and_venue_rejections_are_recorded() {
        let mut criteria = PoolCriteria::default();
        criteria.universe.venues.insert(Venue::new("TWSE"));
        criteria.exclude.insert(id("2317"));
        let pool = builder().build_at(d(2024, 1, 31), &criteria, timestamp(9)).unwrap();
        let reason_for = |code: &str| {
            pool.rejected().iter().find(|r| r.equity_id.as_str() == code).map(|r| r.reason.clone())
        };
        assert_eq!(reason_for("2317"), Some(RejectionReason::Excluded));
        assert_eq!(reason_for("6488"), Some(RejectionReason::Venue { venue: Venue::new("TPEX") }));
        assert_eq!(reason_for("2330"), None);
    }

    #[test]
    fn venue_include_and_exclude() {
        let mut criteria = PoolCriteria::default();
        criteria.universe.venues.insert(Venue::new("TWSE"));
        criteria.exclude.insert(id("2317"));
        let pool = builder().build_at(d(2024, 1, 31), &criteria, timestamp(9)).unwrap();
        assert_eq!(codes(&pool), vec!["2330"]);

        let mut criteria = PoolCriteria::default();
        criteria.include = [id("6488"), id("9999")].into_iter().collect();
        let pool = builder().build_at(d(2024, 1, 31), &criteria, timestamp(9)).unwrap();
        assert_eq!(codes(&pool), vec!["6488"]);
    }

    #[test]
    fn history_counted_at_as_of() {
        let mut criteria = PoolCriteria::default();
        criteria.min_price_history = 10;
        let pool = builder().build_at(d(2024, 1, 8), &criteria, timestamp(9)).unwrap();
        assert!(pool.is_empty());
        let pool = builder().build_at(d(2024, 1, 10), &criteria, timestamp(9)).unwrap();
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn repeated_builds_are_identical() {
        let b = builder();
        let first = b.build_at(d(2024, 1, 31), &PoolCriteria::default(), timestamp(9)).unwrap();
        let second = b.build(d(2024, 1, 31), &PoolCriteria::default()).unwrap();
        assert_eq!(first.records(), second.records());
        assert_eq!(first.content_hash(), second.content_hash());
    }
}
