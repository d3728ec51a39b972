//! In-memory providers backed by already-resolved snapshots.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EstimateRecord, EstimateRepository, Metric, PriceProvider};

/// Estimate store keyed by (symbol, metric)
#[derive(Debug, Clone, Default)]
pub struct InMemoryEstimateRepository {
    records: HashMap<(String, Metric), Vec<EstimateRecord>>,
}

impl InMemoryEstimateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = EstimateRecord>) -> Self {
        let mut repo = Self::new();
        for record in records {
            repo.insert(record);
        }
        repo
    }

    pub fn insert(&mut self, record: EstimateRecord) {
        self.records
            .entry((record.symbol.clone(), record.metric))
            .or_default()
            .push(record);
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EstimateRepository for InMemoryEstimateRepository {
    fn fetch(&self, symbol: &str, metric: Metric, as_of: NaiveDate) -> Vec<EstimateRecord> {
        let mut visible: Vec<EstimateRecord> = self
            .records
            .get(&(symbol.to_string(), metric))
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.estimate_date <= as_of)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        visible.sort_by_key(|r| r.estimate_date);
        visible
    }
}

/// One closing price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: Decimal,
}

/// Price store keyed by symbol then date
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceProvider {
    prices: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl InMemoryPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: impl IntoIterator<Item = PricePoint>) -> Self {
        let mut provider = Self::new();
        for point in points {
            provider.insert(&point.symbol, point.date, point.price);
        }
        provider
    }

    pub fn insert(&mut self, symbol: &str, date: NaiveDate, price: Decimal) {
        self.prices
            .entry(symbol.to_string())
            .or_default()
            .insert(date, price);
    }
}

impl PriceProvider for InMemoryPriceProvider {
    fn price(&self, symbol: &str, date: NaiveDate) -> Option<Decimal> {
        self.prices
            .get(symbol)
            .and_then(|series| series.get(&date))
            .copied()
            .filter(|p| *p > Decimal::ZERO)
    }
}
