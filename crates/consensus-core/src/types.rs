use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ConsensusError;

/// Forecast metric an analyst publishes an estimate for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Eps,
    Revenue,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Eps => "EPS",
            Metric::Revenue => "Revenue",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single analyst's estimate for one metric of one stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub symbol: String,
    pub metric: Metric,
    pub analyst_id: String,
    pub value: f64,
    /// Date the estimate was published; governs visibility in historical replay
    pub estimate_date: NaiveDate,
    /// Earnings report the estimate refers to
    pub earnings_date: NaiveDate,
}

/// Summary statistics of the analyst estimates for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub symbol: String,
    pub metric: Metric,
    pub mean: f64,
    pub std_dev: f64,
    /// std_dev / mean, keeps the sign of the mean
    pub coefficient_of_variation: f64,
    /// Number of distinct analysts contributing
    pub analyst_count: usize,
    /// std_dev / |mean|; +inf when fewer than two analysts contribute
    pub dispersion_ratio: f64,
}

impl ConsensusResult {
    /// Whether enough analysts contributed for the ratio to be meaningful
    pub fn has_dispersion(&self) -> bool {
        self.analyst_count >= 2 && self.dispersion_ratio.is_finite()
    }
}

/// Permissiveness level for qualification thresholds
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    Strict,
    #[default]
    Adaptive,
    Relaxed,
    Emergency,
}

impl OptimizationMode {
    /// All modes from tightest to loosest
    pub const ALL: [OptimizationMode; 4] = [
        OptimizationMode::Strict,
        OptimizationMode::Adaptive,
        OptimizationMode::Relaxed,
        OptimizationMode::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::Strict => "strict",
            OptimizationMode::Adaptive => "adaptive",
            OptimizationMode::Relaxed => "relaxed",
            OptimizationMode::Emergency => "emergency",
        }
    }
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationMode {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(OptimizationMode::Strict),
            "adaptive" => Ok(OptimizationMode::Adaptive),
            "relaxed" => Ok(OptimizationMode::Relaxed),
            "emergency" => Ok(OptimizationMode::Emergency),
            other => Err(ConsensusError::InvalidConfig(format!(
                "unknown optimization mode '{}'",
                other
            ))),
        }
    }
}

/// Qualification limits for one sector under one optimization mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorThresholds {
    pub sector_name: String,
    /// Maximum EPS dispersion ratio that still counts as consensus
    pub eps_threshold: f64,
    /// Maximum revenue dispersion ratio that still counts as consensus
    pub revenue_threshold: f64,
    pub min_analyst_coverage: usize,
    /// Minimum market capitalization in USD
    pub min_market_cap: f64,
}

impl SectorThresholds {
    pub fn threshold_for(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Eps => self.eps_threshold,
            Metric::Revenue => self.revenue_threshold,
        }
    }
}

/// A stock that is tracked by the scanner and the backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseMember {
    pub symbol: String,
    pub sector: String,
    pub market_cap: f64,
}

/// Everything needed to evaluate one stock at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub symbol: String,
    pub sector: String,
    pub market_cap: f64,
    pub eps_estimates: Vec<EstimateRecord>,
    pub revenue_estimates: Vec<EstimateRecord>,
}

/// A qualifying low-dispersion situation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub sector: String,
    pub eps_consensus: ConsensusResult,
    pub revenue_consensus: ConsensusResult,
    /// Qualification strength, 0 to 100; not a probability
    pub confidence_score: f64,
    pub earnings_date: Option<NaiveDate>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("STRICT".parse::<OptimizationMode>().unwrap(), OptimizationMode::Strict);
        assert_eq!(" relaxed ".parse::<OptimizationMode>().unwrap(), OptimizationMode::Relaxed);
        assert!("yolo".parse::<OptimizationMode>().is_err());
    }

    #[test]
    fn test_mode_order_is_tightest_first() {
        let mut modes = OptimizationMode::ALL.to_vec();
        modes.sort();
        assert_eq!(modes, OptimizationMode::ALL.to_vec());
        assert_eq!(OptimizationMode::default(), OptimizationMode::Adaptive);
    }

    #[test]
    fn test_metric_serde() {
        let json = serde_json::to_string(&Metric::Revenue).unwrap();
        assert_eq!(json, "\"revenue\"");
        let metric: Metric = serde_json::from_str("\"eps\"").unwrap();
        assert_eq!(metric, Metric::Eps);
    }

    #[test]
    fn test_has_dispersion() {
        let result = ConsensusResult {
            symbol: "X".to_string(),
            metric: Metric::Eps,
            mean: 1.0,
            std_dev: 0.0,
            coefficient_of_variation: 0.0,
            analyst_count: 1,
            dispersion_ratio: f64::INFINITY,
        };
        assert!(!result.has_dispersion());
    }
}
