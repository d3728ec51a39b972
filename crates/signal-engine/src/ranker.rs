//! Signal Ranking Module
//!
//! Orders qualifying signals across the tracked universe.

use std::cmp::Ordering;
use std::collections::HashMap;

use consensus_core::Signal;

/// Orders and deduplicates signals
pub struct SignalRanker;

impl SignalRanker {
    /// Rank signals by descending confidence, then ascending symbol.
    ///
    /// When a symbol appears more than once only its highest-confidence signal
    /// is kept (the first one seen on a tie).
    pub fn rank(signals: impl IntoIterator<Item = Signal>) -> Vec<Signal> {
        let mut best: HashMap<String, Signal> = HashMap::new();
        for signal in signals {
            match best.get(&signal.symbol) {
                Some(existing) if existing.confidence_score >= signal.confidence_score => {}
                _ => {
                    best.insert(signal.symbol.clone(), signal);
                }
            }
        }

        let mut ranked: Vec<Signal> = best.into_values().collect();
        ranked.sort_by(Self::compare);
        ranked
    }

    /// Rank and keep at most `limit` signals
    pub fn rank_top(signals: impl IntoIterator<Item = Signal>, limit: usize) -> Vec<Signal> {
        let mut ranked = Self::rank(signals);
        ranked.truncate(limit);
        ranked
    }

    fn compare(a: &Signal, b: &Signal) -> Ordering {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then_with(|| a.symbol.cmp(&b.symbol))
    }
}
