//! Sector- and mode-specific qualification thresholds.
//!
//! The table is resolved once into a (sector, mode) map at construction, so
//! lookups during a run never recompute or mutate thresholds.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use consensus_core::{ConsensusError, OptimizationMode, Result, SectorThresholds};
use serde::{Deserialize, Serialize};

/// Sector profile used when a stock's sector is not in the table
pub const DEFAULT_SECTOR: &str = "Default";

/// No mode may accept fewer analysts than this
pub const MIN_COVERAGE_FLOOR: usize = 2;

/// Fixed adjustment of the adaptive baseline for one mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeScaling {
    /// Multiplies both dispersion thresholds
    pub threshold_multiplier: f64,
    /// Multiplies the minimum market cap
    pub market_cap_multiplier: f64,
    /// Added to the minimum analyst coverage
    pub coverage_delta: i64,
}

impl ModeScaling {
    pub fn for_mode(mode: OptimizationMode) -> Self {
        match mode {
            OptimizationMode::Strict => Self {
                threshold_multiplier: 0.75,
                market_cap_multiplier: 1.5,
                coverage_delta: 1,
            },
            OptimizationMode::Adaptive => Self {
                threshold_multiplier: 1.0,
                market_cap_multiplier: 1.0,
                coverage_delta: 0,
            },
            OptimizationMode::Relaxed => Self {
                threshold_multiplier: 1.25,
                market_cap_multiplier: 0.75,
                coverage_delta: -1,
            },
            OptimizationMode::Emergency => Self {
                threshold_multiplier: 1.5,
                market_cap_multiplier: 0.5,
                coverage_delta: -2,
            },
        }
    }

    fn apply(&self, baseline: &SectorThresholds) -> SectorThresholds {
        let coverage = (baseline.min_analyst_coverage as i64 + self.coverage_delta)
            .max(MIN_COVERAGE_FLOOR as i64) as usize;
        SectorThresholds {
            sector_name: baseline.sector_name.clone(),
            eps_threshold: baseline.eps_threshold * self.threshold_multiplier,
            revenue_threshold: baseline.revenue_threshold * self.threshold_multiplier,
            min_analyst_coverage: coverage,
            min_market_cap: baseline.min_market_cap * self.market_cap_multiplier,
        }
    }
}

/// Global floors from the configuration surface, applied to every sector's
/// baseline before mode scaling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default)]
    pub min_market_cap: Option<f64>,
    #[serde(default)]
    pub min_analyst_coverage: Option<usize>,
}

/// Adaptive-mode baseline table, as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorTable {
    pub sectors: Vec<SectorThresholds>,
    #[serde(default)]
    pub default: Option<SectorThresholds>,
}

impl SectorTable {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Built-in adaptive baseline
    pub fn builtin() -> Self {
        let row = |name: &str, eps: f64, revenue: f64, coverage: usize, cap: f64| SectorThresholds {
            sector_name: name.to_string(),
            eps_threshold: eps,
            revenue_threshold: revenue,
            min_analyst_coverage: coverage,
            min_market_cap: cap,
        };
        Self {
            sectors: vec![
                row("Technology", 0.20, 0.10, 3, 2.0e9),
                row("Healthcare", 0.25, 0.12, 3, 1.0e9),
                row("Financials", 0.12, 0.06, 3, 2.0e9),
                row("Energy", 0.30, 0.15, 3, 1.0e9),
                row("Consumer Discretionary", 0.18, 0.09, 3, 1.0e9),
                row("Consumer Staples", 0.12, 0.06, 3, 1.0e9),
                row("Industrials", 0.15, 0.08, 3, 1.0e9),
                row("Utilities", 0.10, 0.05, 3, 1.0e9),
            ],
            default: Some(builtin_default()),
        }
    }
}

fn builtin_default() -> SectorThresholds {
    SectorThresholds {
        sector_name: DEFAULT_SECTOR.to_string(),
        eps_threshold: 0.15,
        revenue_threshold: 0.08,
        min_analyst_coverage: 3,
        min_market_cap: 1.0e9,
    }
}

fn sector_key(sector: &str) -> String {
    sector.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn validate(row: &SectorThresholds) -> Result<()> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !positive(row.eps_threshold) || !positive(row.revenue_threshold) {
        return Err(ConsensusError::InvalidConfig(format!(
            "sector '{}' needs positive dispersion thresholds",
            row.sector_name
        )));
    }
    if !row.min_market_cap.is_finite() || row.min_market_cap < 0.0 {
        return Err(ConsensusError::InvalidConfig(format!(
            "sector '{}' has invalid min_market_cap {}",
            row.sector_name, row.min_market_cap
        )));
    }
    if row.min_analyst_coverage == 0 {
        return Err(ConsensusError::InvalidConfig(format!(
            "sector '{}' needs min_analyst_coverage >= 1",
            row.sector_name
        )));
    }
    Ok(())
}

/// Resolves the thresholds that apply to a (sector, mode) pair.
pub struct ThresholdPolicy {
    resolved: HashMap<(String, OptimizationMode), SectorThresholds>,
    fallback: HashMap<OptimizationMode, SectorThresholds>,
    warned: Mutex<HashSet<String>>,
}

impl ThresholdPolicy {
    pub fn new(table: SectorTable, overrides: &ThresholdOverrides) -> Result<Self> {
        let default_row = table.default.clone().unwrap_or_else(builtin_default);

        let apply_overrides = |row: &SectorThresholds| -> Result<SectorThresholds> {
            let mut row = row.clone();
            if let Some(cap) = overrides.min_market_cap {
                row.min_market_cap = cap;
            }
            if let Some(coverage) = overrides.min_analyst_coverage {
                row.min_analyst_coverage = coverage;
            }
            validate(&row)?;
            Ok(row)
        };

        let sectors = table
            .sectors
            .iter()
            .map(|row| apply_overrides(row))
            .collect::<Result<Vec<_>>>()?;
        let default_row = apply_overrides(&default_row)?;

        Ok(Self::from_baselines(&sectors, &default_row))
    }

    /// Policy over the built-in table with no overrides.
    pub fn builtin() -> Self {
        let table = SectorTable::builtin();
        let default_row = table.default.unwrap_or_else(builtin_default);
        Self::from_baselines(&table.sectors, &default_row)
    }

    /// Expand already-validated adaptive baselines into every mode.
    fn from_baselines(sectors: &[SectorThresholds], default_row: &SectorThresholds) -> Self {
        let mut resolved = HashMap::new();
        for row in sectors {
            for mode in OptimizationMode::ALL {
                resolved.insert(
                    (sector_key(&row.sector_name), mode),
                    ModeScaling::for_mode(mode).apply(row),
                );
            }
        }

        let fallback = OptimizationMode::ALL
            .iter()
            .map(|mode| (*mode, ModeScaling::for_mode(*mode).apply(default_row)))
            .collect();

        Self {
            resolved,
            fallback,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Thresholds for a sector and mode, falling back to the default profile
    /// for unrecognized sectors.
    pub fn resolve(&self, sector: &str, mode: OptimizationMode) -> &SectorThresholds {
        self.resolve_with_fallback(sector, mode).0
    }

    /// Like [`resolve`](Self::resolve), also reporting whether the default
    /// profile was used.
    pub fn resolve_with_fallback(
        &self,
        sector: &str,
        mode: OptimizationMode,
    ) -> (&SectorThresholds, bool) {
        let key = sector_key(sector);
        if let Some(thresholds) = self.resolved.get(&(key.clone(), mode)) {
            return (thresholds, false);
        }

        if let Ok(mut warned) = self.warned.lock() {
            if warned.insert(key) {
                tracing::warn!(sector = %sector, "Unknown sector, using default thresholds");
            }
        }
        (&self.fallback[&mode], true)
    }

    pub fn is_known_sector(&self, sector: &str) -> bool {
        self.resolved
            .contains_key(&(sector_key(sector), OptimizationMode::Adaptive))
    }
}
