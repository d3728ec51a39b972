use chrono::NaiveDate;
use consensus_core::{OptimizationMode, Signal};
use position_sizer::{PositionDecision, PositionSizer};
use serde::Serialize;
use signal_engine::{RejectionReason, ScanExclusion, ScanReport};

/// A ranked signal with the position the sizer would take on it.
#[derive(Debug, Clone, Serialize)]
pub struct SizedSignal {
    pub rank: usize,
    pub signal: Signal,
    pub position: PositionDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveReport {
    pub as_of: NaiveDate,
    pub mode: OptimizationMode,
    pub portfolio_value: f64,
    pub total_exposure: f64,
    pub signals: Vec<SizedSignal>,
    pub rejections: Vec<RejectedSymbol>,
    pub exclusions: Vec<ScanExclusion>,
    pub sector_fallbacks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedSymbol {
    pub symbol: String,
    pub reason: RejectionReason,
}

impl LiveReport {
    /// Size signals in rank order; each accepted position counts against the
    /// exposure available to the ones after it.
    pub fn build(
        scan: ScanReport,
        sizer: &PositionSizer,
        as_of: NaiveDate,
        mode: OptimizationMode,
        portfolio_value: f64,
        max_signals: Option<usize>,
    ) -> Self {
        let limit = max_signals.unwrap_or(scan.signals.len());
        let mut exposure = 0.0;
        let signals = scan
            .signals
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, signal)| {
                let position = sizer.decide(&signal, portfolio_value, exposure);
                exposure += position.size;
                SizedSignal {
                    rank: i + 1,
                    signal,
                    position,
                }
            })
            .collect();

        Self {
            as_of,
            mode,
            portfolio_value,
            total_exposure: exposure,
            signals,
            rejections: scan
                .rejections
                .into_iter()
                .map(|(symbol, reason)| RejectedSymbol { symbol, reason })
                .collect(),
            exclusions: scan.exclusions,
            sector_fallbacks: scan.sector_fallbacks,
        }
    }
}
