use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use consensus_core::{ConsensusError, OptimizationMode, Result};
use serde::{Deserialize, Serialize};

use crate::generator::DEFAULT_MIN_DISPERSION_FLOOR;
use crate::scoring::ScoringWeights;
use crate::thresholds::{SectorTable, ThresholdOverrides, ThresholdPolicy};

/// Signal engine configuration, read once per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: OptimizationMode,
    pub min_dispersion_floor: f64,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub overrides: ThresholdOverrides,
    /// JSON sector table; the built-in table is used when unset
    #[serde(default)]
    pub sector_table_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: OptimizationMode::Adaptive,
            min_dispersion_floor: DEFAULT_MIN_DISPERSION_FLOOR,
            scoring: ScoringWeights::default(),
            overrides: ThresholdOverrides::default(),
            sector_table_path: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConsensusError::InvalidConfig(format!("{} has invalid value '{}'", name, raw))),
        _ => Ok(None),
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            mode: match env::var("OPTIMIZATION_MODE") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.mode,
            },
            min_dispersion_floor: parse_var("MIN_DISPERSION_FLOOR")?
                .unwrap_or(defaults.min_dispersion_floor),
            scoring: defaults.scoring,
            overrides: ThresholdOverrides {
                min_market_cap: parse_var("MIN_MARKET_CAP")?,
                min_analyst_coverage: parse_var("MIN_ANALYST_COVERAGE")?,
            },
            sector_table_path: env::var("SECTOR_THRESHOLDS_PATH").ok().map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_dispersion_floor.is_finite() || self.min_dispersion_floor <= 0.0 {
            return Err(ConsensusError::InvalidConfig(
                "min_dispersion_floor must be a positive number".to_string(),
            ));
        }
        if !self.scoring.is_valid() {
            return Err(ConsensusError::InvalidConfig(
                "scoring weights must be non-negative with a positive metric weight".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the sector table and resolve every (sector, mode) pair.
    pub fn build_policy(&self) -> Result<ThresholdPolicy> {
        let table = match &self.sector_table_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading sector thresholds");
                SectorTable::from_path(path)?
            }
            None => SectorTable::builtin(),
        };
        ThresholdPolicy::new(table, &self.overrides)
    }
}
