use thiserror::Error;

use crate::Metric;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("No estimates supplied for {symbol} {metric}")]
    EmptyEstimates { symbol: String, metric: Metric },

    #[error("Mixed estimate batch: expected {expected}, found {found}")]
    MixedBatch { expected: String, found: String },

    #[error("Mean {metric} estimate for {symbol} is zero; dispersion is undefined")]
    ZeroMean { symbol: String, metric: Metric },

    #[error("Invalid estimate from analyst {analyst_id} for {symbol}: {value}")]
    InvalidEstimate {
        symbol: String,
        analyst_id: String,
        value: f64,
    },

    #[error("Negative market cap for {symbol}: {market_cap}")]
    NegativeMarketCap { symbol: String, market_cap: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ConsensusError {
    /// True for errors caused by a malformed evaluation input. These abort only
    /// the offending evaluation; callers scanning a universe record them and move on.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ConsensusError::EmptyEstimates { .. }
                | ConsensusError::MixedBatch { .. }
                | ConsensusError::ZeroMean { .. }
                | ConsensusError::InvalidEstimate { .. }
                | ConsensusError::NegativeMarketCap { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
