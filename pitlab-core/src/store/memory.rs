//! In-memory store. Backs the CSV loader and every test fixture.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::{MarketStore, StoreError};
use crate::domain::{Equity, EquityId, PriceBar, RatioRecord, RevenueRecord, StatementRecord};

#[derive(Debug, Clone, Default)]
struct EquityData {
    bars: Vec<PriceBar>,
    revenue: Vec<RevenueRecord>,
    ratios: Vec<RatioRecord>,
    statements: Vec<StatementRecord>,
}

/// A store holding every row in memory.
///
/// Rows are returned as inserted; no validation happens here.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    equities: BTreeMap<EquityId, Equity>,
    data: BTreeMap<EquityId, EquityData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { name: "memory".to_string(), ..Self::default() }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn add_equity(&mut self, equity: Equity) {
        self.equities.insert(equity.id.clone(), equity);
    }

    pub fn add_bars(&mut self, id: &EquityId, bars: impl IntoIterator<Item = PriceBar>) {
        self.entry(id).bars.extend(bars);
    }

    pub fn add_revenue(&mut self, id: &EquityId, rows: impl IntoIterator<Item = RevenueRecord>) {
        self.entry(id).revenue.extend(rows);
    }

    pub fn add_ratios(&mut self, id: &EquityId, rows: impl IntoIterator<Item = RatioRecord>) {
        self.entry(id).ratios.extend(rows);
    }

    pub fn add_statements(
        &mut self,
        id: &EquityId,
        rows: impl IntoIterator<Item = StatementRecord>,
    ) {
        self.entry(id).statements.extend(rows);
    }

    pub fn with_equity(mut self, equity: Equity) -> Self {
        self.add_equity(equity);
        self
    }

    pub fn with_bars(mut self, id: &EquityId, bars: impl IntoIterator<Item = PriceBar>) -> Self {
        self.add_bars(id, bars);
        self
    }

    pub fn with_revenue(
        mut self,
        id: &EquityId,
        rows: impl IntoIterator<Item = RevenueRecord>,
    ) -> Self {
        self.add_revenue(id, rows);
        self
    }

    pub fn with_ratios(
        mut self,
        id: &EquityId,
        rows: impl IntoIterator<Item = RatioRecord>,
    ) -> Self {
        self.add_ratios(id, rows);
        self
    }

    pub fn with_statements(
        mut self,
        id: &EquityId,
        rows: impl IntoIterator<Item = StatementRecord>,
    ) -> Self {
        self.add_statements(id, rows);
        self
    }

    pub fn equity_count(&self) -> usize {
        self.equities.len()
    }

    fn entry(&mut self, id: &EquityId) -> &mut EquityData {
        self.data.entry(id.clone()).or_default()
    }
}

impl MarketStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn equities(&self) -> Result<Vec<Equity>, StoreError> {
        Ok(self.equities.values().cloned().collect())
    }

    fn prices(
        &self,
        equity_id: &EquityId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, StoreError> {
        Ok(self
            .data
            .get(equity_id)
            .map(|d| {
                d.bars
                    .iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn monthly_revenue(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<RevenueRecord>, StoreError> {
        Ok(self
            .data
            .get(equity_id)
            .map(|d| d.revenue.iter().filter(|r| r.published <= published_by).cloned().collect())
            .unwrap_or_default())
    }

    fn ratios(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<RatioRecord>, StoreError> {
        Ok(self
            .data
            .get(equity_id)
            .map(|d| d.ratios.iter().filter(|r| r.published <= published_by).cloned().collect())
            .unwrap_or_default())
    }

    fn statements(
        &self,
        equity_id: &EquityId,
        published_by: NaiveDate,
    ) -> Result<Vec<StatementRecord>, StoreError> {
        Ok(self
            .data
            .get(equity_id)
            .map(|d| d.statements.iter().filter(|s| s.published <= published_by).cloned().collect())
            .unwrap_or_default())
    }
}
