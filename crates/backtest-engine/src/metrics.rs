use chrono::NaiveDate;
use consensus_core::stats::{max_drawdown, mean, std_dev};
use rust_decimal::prelude::*;

use crate::models::{EquityPoint, TradeOutcome};

/// Aggregate performance of a set of closed trades.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeMetrics {
    pub final_equity: Decimal,
    pub total_return: f64,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub win_rate: Option<f64>,
    pub profit_factor: Option<f64>,
    pub avg_holding_period_days: Option<f64>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Compute metrics from trades already sorted by entry date.
///
/// The equity curve starts at `initial_capital` on `start_date` and adds each
/// trade's realized P&L in entry order. Each point is dated by the entry date
/// of the trade it adds, so point dates never go backwards.
pub fn compute_trade_metrics(
    trades: &[TradeOutcome],
    initial_capital: Decimal,
    start_date: NaiveDate,
    periods_per_year: f64,
) -> TradeMetrics {
    let mut equity = initial_capital;
    let mut points = vec![(start_date, equity)];
    for trade in trades {
        equity += trade.profit_loss;
        points.push((trade.entry_date, equity));
    }

    let curve_f64: Vec<f64> = points
        .iter()
        .map(|(_, e)| e.to_f64().unwrap_or(0.0))
        .collect();
    let mut peak = f64::MIN;
    let equity_curve = points
        .iter()
        .zip(curve_f64.iter())
        .map(|((date, value), value_f64)| {
            peak = peak.max(*value_f64);
            let drawdown_percent = if peak > 0.0 {
                (peak - value_f64) / peak * 100.0
            } else {
                0.0
            };
            EquityPoint {
                date: *date,
                equity: *value,
                drawdown_percent,
            }
        })
        .collect();

    let total_return = if initial_capital > Decimal::ZERO {
        ((equity - initial_capital) / initial_capital)
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    };

    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct / 100.0).collect();

    TradeMetrics {
        final_equity: equity,
        total_return,
        sharpe_ratio: sharpe_ratio(&returns, periods_per_year),
        max_drawdown: max_drawdown(&curve_f64),
        win_rate: win_rate(trades),
        profit_factor: profit_factor(trades),
        avg_holding_period_days: if trades.is_empty() {
            None
        } else {
            let days: Vec<f64> = trades.iter().map(|t| t.holding_period_days as f64).collect();
            Some(mean(&days))
        },
        equity_curve,
    }
}

/// mean / std_dev of per-trade returns, annualized by sqrt(periods_per_year).
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let sd = std_dev(returns);
    if !sd.is_finite() || sd < f64::EPSILON {
        return None;
    }
    Some(mean(returns) / sd * periods_per_year.sqrt())
}

/// Fraction of trades with a positive return; `None` with no trades.
pub fn win_rate(trades: &[TradeOutcome]) -> Option<f64> {
    if trades.is_empty() {
        return None;
    }
    let wins = trades.iter().filter(|t| t.return_pct > 0.0).count();
    Some(wins as f64 / trades.len() as f64)
}

/// Gross profit / gross loss; `None` when nothing was lost.
pub fn profit_factor(trades: &[TradeOutcome]) -> Option<f64> {
    let gross_profit: Decimal = trades
        .iter()
        .filter(|t| t.profit_loss > Decimal::ZERO)
        .map(|t| t.profit_loss)
        .sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.profit_loss < Decimal::ZERO)
        .map(|t| t.profit_loss.abs())
        .sum();
    if gross_loss > Decimal::ZERO {
        (gross_profit / gross_loss).to_f64()
    } else {
        None
    }
}
