use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use consensus_core::{
    EstimateRecord, InMemoryEstimateRepository, InMemoryPriceProvider, PricePoint, UniverseMember,
};
use serde::{Deserialize, Serialize};

/// Resolved input data for one run: the universe with sectors and market
/// caps, every estimate record and the closing prices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub universe: Vec<UniverseMember>,
    #[serde(default)]
    pub estimates: Vec<EstimateRecord>,
    #[serde(default)]
    pub prices: Vec<PricePoint>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn into_providers(
        self,
    ) -> (Vec<UniverseMember>, InMemoryEstimateRepository, InMemoryPriceProvider) {
        (
            self.universe,
            InMemoryEstimateRepository::from_records(self.estimates),
            InMemoryPriceProvider::from_points(self.prices),
        )
    }
}
