use chrono::NaiveDate;
use consensus_core::OptimizationMode;
use position_sizer::SizingConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rule deciding when an opened position is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum HoldingPeriod {
    /// Close a fixed number of calendar days after entry.
    FixedDays { days: i64 },
    /// Close on the signal's next earnings date, or after `fallback_days` when
    /// the signal has no earnings date after entry.
    NextEarnings { fallback_days: i64 },
}

impl Default for HoldingPeriod {
    fn default() -> Self {
        HoldingPeriod::NextEarnings { fallback_days: 30 }
    }
}

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub mode: OptimizationMode,
    #[serde(default)]
    pub holding_period: HoldingPeriod,
    /// Weekdays between evaluation dates; a weekend start moves to Monday.
    #[serde(default = "default_step_days")]
    pub step_days: i64,
    /// Annualization constant for the Sharpe ratio.
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    #[serde(default)]
    pub sizing: SizingConfig,
}

fn default_step_days() -> i64 {
    1
}

fn default_periods_per_year() -> f64 {
    252.0
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            mode: OptimizationMode::Adaptive,
            holding_period: HoldingPeriod::default(),
            step_days: default_step_days(),
            periods_per_year: default_periods_per_year(),
            sizing: SizingConfig::default(),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    HoldingPeriod,
    EarningsDate,
    EndOfBacktest,
}

/// A round-trip trade (entry + exit) from the backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// Percent return, e.g. 5.0 = +5%
    pub return_pct: f64,
    pub signal_confidence: f64,
    pub shares: Decimal,
    pub profit_loss: Decimal,
    pub holding_period_days: i64,
    pub exit_reason: ExitReason,
}

/// A point on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Entry date of the trade whose realized P&L this point adds
    pub date: NaiveDate,
    pub equity: Decimal,
    pub drawdown_percent: f64,
}

/// Kind of data gap that kept a symbol or trade out of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    MissingEntryPrice,
    MissingExitPrice,
    InvalidInput,
}

/// One recorded exclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub date: NaiveDate,
    pub symbol: String,
    pub kind: GapKind,
    pub detail: String,
}

/// Counts of recoverable data problems met during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGapSummary {
    pub missing_entry_price: usize,
    pub missing_exit_price: usize,
    pub invalid_input: usize,
    /// Evaluations that used default sector thresholds
    pub sector_fallbacks: usize,
    /// Estimate records dropped because they were published after the step date
    pub look_ahead_filtered: usize,
}

impl DataGapSummary {
    pub fn total(&self) -> usize {
        self.missing_entry_price + self.missing_exit_price + self.invalid_input
    }
}

/// Counts of expected, non-error outcomes that did not become trades.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionSummary {
    /// Evaluations that failed thresholds or coverage
    pub policy_rejections: usize,
    /// Signals the position sizer sized at zero
    pub sizing_rejections: usize,
    /// Signals for symbols already held
    pub already_held: usize,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub mode: OptimizationMode,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    /// Trades in non-decreasing entry_date order
    pub trades: Vec<TradeOutcome>,
    /// Fractional return on initial capital, e.g. 0.05 = +5%
    pub total_return: f64,
    pub sharpe_ratio: Option<f64>,
    /// Fractional peak-to-trough decline, e.g. 0.10 = 10%
    pub max_drawdown: f64,
    /// Fraction of winning trades; `None` when no trade closed
    pub win_rate: Option<f64>,
    pub profit_factor: Option<f64>,
    pub avg_holding_period_days: Option<f64>,
    pub equity_curve: Vec<EquityPoint>,
    /// Signals for symbols not already held, summed over steps
    pub signals_generated: usize,
    pub steps_evaluated: usize,
    pub data_gaps: DataGapSummary,
    pub rejections: RejectionSummary,
    pub exclusions: Vec<Exclusion>,
    /// The run was stopped between steps before reaching end_date
    pub aborted: bool,
}

/// One row of the mode calibration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeCalibration {
    pub mode: OptimizationMode,
    pub signal_count: usize,
    pub trade_count: usize,
    pub win_rate: Option<f64>,
    pub total_return: f64,
    pub sharpe_ratio: Option<f64>,
}
