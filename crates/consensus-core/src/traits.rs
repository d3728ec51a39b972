use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{EstimateRecord, Metric};

/// Source of analyst estimate records
///
/// Implementations must only return records whose `estimate_date` is on or
/// before `as_of`. The backtest re-checks this before evaluating.
pub trait EstimateRepository: Send + Sync {
    fn fetch(&self, symbol: &str, metric: Metric, as_of: NaiveDate) -> Vec<EstimateRecord>;
}

/// Source of historical prices. `None` means the price is unavailable.
pub trait PriceProvider: Send + Sync {
    fn price(&self, symbol: &str, date: NaiveDate) -> Option<Decimal>;
}
