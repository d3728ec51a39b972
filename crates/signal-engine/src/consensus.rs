use std::collections::HashMap;

use consensus_core::stats::{mean, std_dev};
use consensus_core::{ConsensusError, ConsensusResult, EstimateRecord, Metric, Result};

/// Reduces one metric's analyst estimates into a consensus ratio.
pub struct ConsensusCalculator;

impl ConsensusCalculator {
    /// Compute consensus statistics for a batch of estimates sharing one symbol
    /// and metric.
    ///
    /// Each analyst counts once: when an analyst revised their estimate, only
    /// the latest one by `estimate_date` is used. With fewer than two analysts
    /// the dispersion ratio is +inf so coverage checks reject it downstream.
    pub fn compute(estimates: &[EstimateRecord], metric: Metric) -> Result<ConsensusResult> {
        let first = estimates.first().ok_or_else(|| ConsensusError::EmptyEstimates {
            symbol: "<none>".to_string(),
            metric,
        })?;
        let symbol = first.symbol.as_str();

        let mut latest: HashMap<&str, &EstimateRecord> = HashMap::new();
        for record in estimates {
            if record.symbol != symbol || record.metric != metric {
                return Err(ConsensusError::MixedBatch {
                    expected: format!("{} {}", symbol, metric),
                    found: format!("{} {}", record.symbol, record.metric),
                });
            }
            if !record.value.is_finite() {
                return Err(ConsensusError::InvalidEstimate {
                    symbol: record.symbol.clone(),
                    analyst_id: record.analyst_id.clone(),
                    value: record.value,
                });
            }
            latest
                .entry(record.analyst_id.as_str())
                .and_modify(|current| {
                    if record.estimate_date >= current.estimate_date {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        // Sorted by analyst so the float sums do not depend on hash order
        let mut by_analyst: Vec<(&str, f64)> =
            latest.into_iter().map(|(id, r)| (id, r.value)).collect();
        by_analyst.sort_by(|a, b| a.0.cmp(b.0));
        let values: Vec<f64> = by_analyst.into_iter().map(|(_, v)| v).collect();

        let analyst_count = values.len();
        let avg = mean(&values);
        if avg.abs() < f64::EPSILON {
            return Err(ConsensusError::ZeroMean {
                symbol: symbol.to_string(),
                metric,
            });
        }

        let identical = values.iter().all(|v| *v == values[0]);
        let sd = if identical { 0.0 } else { std_dev(&values) };

        let (coefficient_of_variation, dispersion_ratio) = if analyst_count < 2 {
            (f64::INFINITY, f64::INFINITY)
        } else {
            (sd / avg, sd / avg.abs())
        };

        Ok(ConsensusResult {
            symbol: symbol.to_string(),
            metric,
            mean: avg,
            std_dev: sd,
            coefficient_of_variation,
            analyst_count,
            dispersion_ratio,
        })
    }
}
