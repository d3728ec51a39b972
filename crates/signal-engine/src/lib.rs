//! Consensus Signal Engine
//!
//! Reduces per-analyst EPS and revenue estimates into dispersion ratios,
//! qualifies low-dispersion stocks against sector and mode thresholds, and
//! ranks the resulting signals.

pub mod config;
pub mod consensus;
pub mod generator;
pub mod ranker;
pub mod scoring;
pub mod thresholds;

pub use config::EngineConfig;
pub use consensus::ConsensusCalculator;
pub use generator::{Evaluation, RejectionReason, ScanExclusion, ScanReport, SignalGenerator};
pub use ranker::SignalRanker;
pub use scoring::{score_confidence, ScoreInputs, ScoringWeights};
pub use thresholds::{ModeScaling, SectorTable, ThresholdOverrides, ThresholdPolicy};
