use anyhow::Result;
use chrono::NaiveDate;
use consensus_core::{OptimizationMode, UniverseMember};
use rayon::prelude::*;
use rust_decimal::Decimal;

use crate::engine::BacktestEngine;
use crate::models::ModeCalibration;

impl<'a> BacktestEngine<'a> {
    /// Run the same backtest once per optimization mode and tabulate how
    /// signal volume and performance trade off.
    ///
    /// Modes run in parallel; rows come back in strict → emergency order.
    pub fn calibrate_modes(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        universe: &[UniverseMember],
        initial_capital: Decimal,
    ) -> Result<Vec<ModeCalibration>> {
        OptimizationMode::ALL
            .par_iter()
            .map(|&mode| {
                let result = self
                    .with_mode(mode)
                    .run(start_date, end_date, universe, initial_capital)?;
                tracing::info!(
                    mode = %mode,
                    signals = result.signals_generated,
                    trades = result.trades.len(),
                    "Calibration run finished"
                );
                Ok(ModeCalibration {
                    mode,
                    signal_count: result.signals_generated,
                    trade_count: result.trades.len(),
                    win_rate: result.win_rate,
                    total_return: result.total_return,
                    sharpe_ratio: result.sharpe_ratio,
                })
            })
            .collect()
    }
}
