use std::env;

use anyhow::{bail, Context, Result};
use consensus_core::Signal;
use serde::{Deserialize, Serialize};

/// Exposure limits for sizing consensus signals
///
/// A position is a fraction of portfolio value, optionally scaled down by
/// signal confidence, and never allowed to push total exposure past the
/// ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Maximum single position as a fraction of portfolio value (e.g., 0.10 = 10%)
    pub max_position_fraction: f64,

    /// Maximum total exposure as a fraction of portfolio value (e.g., 0.50 = 50%)
    pub max_total_exposure_fraction: f64,

    /// Positions smaller than this (in currency units) are not worth opening
    pub min_position_value: f64,

    /// Scale the position cap by confidence_score / 100
    pub scale_by_confidence: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_position_fraction: 0.10,       // Maximum 10% position
            max_total_exposure_fraction: 0.50, // At most half the book deployed
            min_position_value: 0.0,
            scale_by_confidence: true,
        }
    }
}

impl SizingConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_position_fraction: env::var("MAX_POSITION_FRACTION")
                .unwrap_or_else(|_| defaults.max_position_fraction.to_string())
                .parse()
                .context("MAX_POSITION_FRACTION must be a number")?,
            max_total_exposure_fraction: env::var("MAX_TOTAL_EXPOSURE_FRACTION")
                .unwrap_or_else(|_| defaults.max_total_exposure_fraction.to_string())
                .parse()
                .context("MAX_TOTAL_EXPOSURE_FRACTION must be a number")?,
            min_position_value: env::var("MIN_POSITION_VALUE")
                .unwrap_or_else(|_| defaults.min_position_value.to_string())
                .parse()
                .context("MIN_POSITION_VALUE must be a number")?,
            scale_by_confidence: env::var("SCALE_BY_CONFIDENCE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.scale_by_confidence),
        })
    }
}

/// Which bound determined the final size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingLimit {
    /// Confidence-scaled size was below every cap
    Unconstrained,
    /// Capped at the single-position fraction
    PositionCap,
    /// Reduced (or zeroed) to stay under the total exposure ceiling
    ExposureCeiling,
    /// Below the minimum worthwhile position
    BelowMinimum,
    /// Inputs could not be sized
    InvalidInput,
}

/// Position sizing recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDecision {
    /// Currency amount to deploy; always finite and >= 0
    pub size: f64,

    /// Size as a fraction of portfolio value
    pub fraction: f64,

    pub limit: SizingLimit,

    /// Reasoning for the position size
    pub reasoning: String,
}

impl PositionDecision {
    fn rejected(limit: SizingLimit, reasoning: String) -> Self {
        Self {
            size: 0.0,
            fraction: 0.0,
            limit,
            reasoning,
        }
    }
}

/// Converts a signal and portfolio state into a bounded position size.
///
/// Sizing fails closed: anything that cannot be sized gets 0, never an error,
/// so a backtest keeps running.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Result<Self> {
        if !(config.max_position_fraction > 0.0 && config.max_position_fraction <= 1.0) {
            bail!("max_position_fraction must be between 0 and 1");
        }
        if !(config.max_total_exposure_fraction > 0.0 && config.max_total_exposure_fraction <= 1.0) {
            bail!("max_total_exposure_fraction must be between 0 and 1");
        }
        if config.max_position_fraction > config.max_total_exposure_fraction {
            bail!("max_position_fraction must be <= max_total_exposure_fraction");
        }
        if !config.min_position_value.is_finite() || config.min_position_value < 0.0 {
            bail!("min_position_value must be >= 0");
        }

        Ok(Self { config })
    }

    /// Conservative limits: 5% positions, 30% total exposure
    pub fn conservative() -> Self {
        Self {
            config: SizingConfig {
                max_position_fraction: 0.05,
                max_total_exposure_fraction: 0.30,
                ..SizingConfig::default()
            },
        }
    }

    /// Aggressive limits: 20% positions, 90% total exposure
    pub fn aggressive() -> Self {
        Self {
            config: SizingConfig {
                max_position_fraction: 0.20,
                max_total_exposure_fraction: 0.90,
                ..SizingConfig::default()
            },
        }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Currency amount to deploy for `signal`
    pub fn size(&self, signal: &Signal, portfolio_value: f64, existing_exposure: f64) -> f64 {
        self.decide(signal, portfolio_value, existing_exposure).size
    }

    /// Size a signal and explain which limit applied
    pub fn decide(
        &self,
        signal: &Signal,
        portfolio_value: f64,
        existing_exposure: f64,
    ) -> PositionDecision {
        if !portfolio_value.is_finite() || portfolio_value <= 0.0 {
            return PositionDecision::rejected(
                SizingLimit::InvalidInput,
                format!("Portfolio value {} cannot be sized", portfolio_value),
            );
        }
        if !existing_exposure.is_finite() || existing_exposure < 0.0 {
            return PositionDecision::rejected(
                SizingLimit::InvalidInput,
                format!("Existing exposure {} cannot be sized", existing_exposure),
            );
        }
        if !signal.confidence_score.is_finite() {
            tracing::warn!(symbol = %signal.symbol, "Signal has non-finite confidence, not sizing");
            return PositionDecision::rejected(
                SizingLimit::InvalidInput,
                "Non-finite confidence score".to_string(),
            );
        }

        let cap = portfolio_value * self.config.max_position_fraction;
        let confidence = (signal.confidence_score / 100.0).clamp(0.0, 1.0);
        let (mut size, mut limit) = if self.config.scale_by_confidence && confidence < 1.0 {
            (cap * confidence, SizingLimit::Unconstrained)
        } else {
            (cap, SizingLimit::PositionCap)
        };

        let ceiling = portfolio_value * self.config.max_total_exposure_fraction;
        let headroom = ceiling - existing_exposure;
        if headroom <= 0.0 {
            return PositionDecision::rejected(
                SizingLimit::ExposureCeiling,
                format!(
                    "Exposure ${:.2} already at ceiling ${:.2}",
                    existing_exposure, ceiling
                ),
            );
        }
        if size > headroom {
            size = headroom;
            limit = SizingLimit::ExposureCeiling;
        }

        if size <= 0.0 || size < self.config.min_position_value {
            return PositionDecision::rejected(
                SizingLimit::BelowMinimum,
                format!(
                    "Size ${:.2} below minimum ${:.2}",
                    size, self.config.min_position_value
                ),
            );
        }

        let fraction = size / portfolio_value;
        PositionDecision {
            size,
            fraction,
            limit,
            reasoning: format!(
                "{:.2}% of portfolio (confidence: {:.0}, cap: {:.0}%, exposure: ${:.2}/${:.2})",
                fraction * 100.0,
                signal.confidence_score,
                self.config.max_position_fraction * 100.0,
                existing_exposure + size,
                ceiling
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use consensus_core::{ConsensusResult, Metric};

    fn signal(symbol: &str, confidence: f64) -> Signal {
        let consensus = |metric| ConsensusResult {
            symbol: symbol.to_string(),
            metric,
            mean: 2.0,
            std_dev: 0.1,
            coefficient_of_variation: 0.05,
            analyst_count: 5,
            dispersion_ratio: 0.05,
        };
        Signal {
            symbol: symbol.to_string(),
            sector: "Technology".to_string(),
            eps_consensus: consensus(Metric::Eps),
            revenue_consensus: consensus(Metric::Revenue),
            confidence_score: confidence,
            earnings_date: None,
            generated_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_full_confidence_hits_position_cap() {
        let sizer = PositionSizer::default();
        let decision = sizer.decide(&signal("AAPL", 100.0), 100_000.0, 0.0);

        assert_relative_eq!(decision.size, 10_000.0, epsilon = 1e-6);
        assert_eq!(decision.limit, SizingLimit::PositionCap);
    }

    #[test]
    fn test_confidence_scales_size() {
        let sizer = PositionSizer::default();
        let size = sizer.size(&signal("AAPL", 80.0), 100_000.0, 0.0);

        // 10% cap * 0.8 confidence
        assert_relative_eq!(size, 8_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unscaled_config_ignores_confidence() {
        let sizer = PositionSizer::new(SizingConfig {
            scale_by_confidence: false,
            ..SizingConfig::default()
        })
        .unwrap();
        let size = sizer.size(&signal("AAPL", 40.0), 100_000.0, 0.0);
        assert_relative_eq!(size, 10_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reduced_to_exposure_headroom() {
        let sizer = PositionSizer::default();
        let decision = sizer.decide(&signal("AAPL", 100.0), 100_000.0, 46_000.0);

        assert_relative_eq!(decision.size, 4_000.0, epsilon = 1e-6);
        assert_eq!(decision.limit, SizingLimit::ExposureCeiling);
    }

    #[test]
    fn test_rejected_at_ceiling() {
        let sizer = PositionSizer::default();
        let decision = sizer.decide(&signal("AAPL", 100.0), 100_000.0, 50_000.0);

        assert_eq!(decision.size, 0.0);
        assert_eq!(decision.limit, SizingLimit::ExposureCeiling);
    }

    #[test]
    fn test_fails_closed_on_bad_input() {
        let sizer = PositionSizer::default();
        for (portfolio, exposure, confidence) in [
            (f64::NAN, 0.0, 90.0),
            (-5.0, 0.0, 90.0),
            (100_000.0, f64::INFINITY, 90.0),
            (100_000.0, -1.0, 90.0),
            (100_000.0, 0.0, f64::NAN),
        ] {
            let decision = sizer.decide(&signal("AAPL", confidence), portfolio, exposure);
            assert_eq!(decision.size, 0.0);
            assert_eq!(decision.limit, SizingLimit::InvalidInput);
        }
    }

    #[test]
    fn test_below_minimum_is_zero() {
        let sizer = PositionSizer::new(SizingConfig {
            min_position_value: 500.0,
            ..SizingConfig::default()
        })
        .unwrap();

        assert_eq!(sizer.size(&signal("AAPL", 100.0), 4_000.0, 0.0), 0.0);
        assert_eq!(sizer.size(&signal("AAPL", 0.0), 100_000.0, 0.0), 0.0);
    }

    #[test]
    fn test_exposure_never_exceeds_ceiling_in_any_order() {
        let sizer = PositionSizer::default();
        let portfolio = 250_000.0;
        let ceiling = portfolio * sizer.config().max_total_exposure_fraction;
        let confidences = [95.0, 40.0, 100.0, 72.5, 88.0, 100.0, 15.0, 99.0, 60.0, 100.0, 100.0];

        // Every rotation of the sequence, forwards and backwards
        for start in 0..confidences.len() {
            for reverse in [false, true] {
                let mut order: Vec<f64> = confidences
                    .iter()
                    .cycle()
                    .skip(start)
                    .take(confidences.len())
                    .copied()
                    .collect();
                if reverse {
                    order.reverse();
                }

                let mut exposure = 0.0;
                for (i, confidence) in order.iter().enumerate() {
                    let size = sizer.size(&signal(&format!("S{}", i), *confidence), portfolio, exposure);
                    assert!(size >= 0.0 && size.is_finite());
                    exposure += size;
                    assert!(exposure <= ceiling + 1e-6, "exposure {} > {}", exposure, ceiling);
                }
            }
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = [
            SizingConfig {
                max_position_fraction: 0.0,
                ..SizingConfig::default()
            },
            SizingConfig {
                max_total_exposure_fraction: 1.5,
                ..SizingConfig::default()
            },
            SizingConfig {
                max_position_fraction: 0.6,
                max_total_exposure_fraction: 0.5,
                ..SizingConfig::default()
            },
            SizingConfig {
                min_position_value: -1.0,
                ..SizingConfig::default()
            },
        ];
        for config in bad {
            assert!(PositionSizer::new(config).is_err());
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(PositionSizer::conservative().config().max_position_fraction, 0.05);
        assert_eq!(PositionSizer::aggressive().config().max_total_exposure_fraction, 0.90);
    }
}
