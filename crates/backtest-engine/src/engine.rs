use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use consensus_core::{EstimateRepository, OptimizationMode, PriceProvider, Signal, UniverseMember};
use position_sizer::PositionSizer;
use rust_decimal::prelude::*;
use signal_engine::SignalGenerator;

use crate::metrics::compute_trade_metrics;
use crate::models::*;
use crate::portfolio::{OpenPosition, PortfolioState};

/// Replays historical estimate snapshots through the signal generator and
/// simulates the resulting trades.
///
/// Time steps run strictly in order: the portfolio produced by one step is
/// the input of the next. Within a step the universe is evaluated in parallel
/// and the resulting entries are committed one at a time in rank order.
#[derive(Clone)]
pub struct BacktestEngine<'a> {
    config: BacktestConfig,
    generator: &'a SignalGenerator,
    sizer: PositionSizer,
    estimates: &'a dyn EstimateRepository,
    prices: &'a dyn PriceProvider,
    abort: Option<Arc<AtomicBool>>,
}

/// Everything a run accumulates besides the portfolio itself.
#[derive(Default)]
struct RunLedger {
    trades: Vec<TradeOutcome>,
    exclusions: Vec<Exclusion>,
    gaps: DataGapSummary,
    rejections: RejectionSummary,
    signals_generated: usize,
    steps_evaluated: usize,
}

impl RunLedger {
    fn exclude(&mut self, date: NaiveDate, symbol: &str, kind: GapKind, detail: String) {
        match kind {
            GapKind::MissingEntryPrice => self.gaps.missing_entry_price += 1,
            GapKind::MissingExitPrice => self.gaps.missing_exit_price += 1,
            GapKind::InvalidInput => self.gaps.invalid_input += 1,
        }
        self.exclusions.push(Exclusion {
            date,
            symbol: symbol.to_string(),
            kind,
            detail,
        });
    }
}

impl<'a> BacktestEngine<'a> {
    pub fn new(
        config: BacktestConfig,
        generator: &'a SignalGenerator,
        estimates: &'a dyn EstimateRepository,
        prices: &'a dyn PriceProvider,
    ) -> Result<Self> {
        if config.step_days < 1 {
            bail!("step_days must be at least 1");
        }
        if !(config.periods_per_year > 0.0) {
            bail!("periods_per_year must be positive");
        }
        match config.holding_period {
            HoldingPeriod::FixedDays { days } | HoldingPeriod::NextEarnings { fallback_days: days }
                if days < 1 =>
            {
                bail!("holding period must be at least one day")
            }
            _ => {}
        }
        let sizer = PositionSizer::new(config.sizing.clone())?;

        Ok(Self {
            config,
            generator,
            sizer,
            estimates,
            prices,
            abort: None,
        })
    }

    /// Stop the run at the next step boundary once `flag` is set.
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Same engine, different optimization mode.
    pub fn with_mode(&self, mode: OptimizationMode) -> Self {
        let mut engine = self.clone();
        engine.config.mode = mode;
        engine
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest over `[start_date, end_date]`.
    ///
    /// Missing prices and malformed per-symbol inputs are recorded as data
    /// gaps; they never abort the run.
    pub fn run(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        universe: &[UniverseMember],
        initial_capital: Decimal,
    ) -> Result<BacktestResult> {
        if start_date > end_date {
            bail!("start_date {} is after end_date {}", start_date, end_date);
        }
        if initial_capital <= Decimal::ZERO {
            bail!("initial_capital must be positive");
        }

        tracing::info!(
            %start_date,
            %end_date,
            mode = %self.config.mode,
            symbols = universe.len(),
            "Starting consensus backtest"
        );

        let mut state = PortfolioState::new(initial_capital);
        let mut ledger = RunLedger::default();
        let mut aborted = false;
        let mut last_step: Option<NaiveDate> = None;

        let mut next = next_trading_day(start_date).filter(|d| *d <= end_date);
        while let Some(date) = next {
            if self.abort_requested() {
                tracing::warn!(%date, "Backtest aborted between steps");
                aborted = true;
                break;
            }
            state = self.step(state, date, universe, &mut ledger);
            ledger.steps_evaluated += 1;
            last_step = Some(date);
            next = advance_trading_days(date, self.config.step_days, end_date);
        }

        // Positions still open are closed at the last evaluated date
        if let Some(final_date) = last_step {
            for symbol in state.positions.keys().cloned().collect::<Vec<_>>() {
                state = self.exit(state, &symbol, final_date, ExitReason::EndOfBacktest, &mut ledger);
            }
        }

        let mut trades = ledger.trades;
        trades.sort_by(|a, b| {
            a.entry_date
                .cmp(&b.entry_date)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let metrics = compute_trade_metrics(
            &trades,
            initial_capital,
            start_date,
            self.config.periods_per_year,
        );

        tracing::info!(
            trades = trades.len(),
            total_return = metrics.total_return,
            gaps = ledger.gaps.total(),
            aborted,
            "Backtest complete"
        );

        Ok(BacktestResult {
            start_date,
            end_date,
            mode: self.config.mode,
            initial_capital,
            final_equity: metrics.final_equity,
            trades,
            total_return: metrics.total_return,
            sharpe_ratio: metrics.sharpe_ratio,
            max_drawdown: metrics.max_drawdown,
            win_rate: metrics.win_rate,
            profit_factor: metrics.profit_factor,
            avg_holding_period_days: metrics.avg_holding_period_days,
            equity_curve: metrics.equity_curve,
            signals_generated: ledger.signals_generated,
            steps_evaluated: ledger.steps_evaluated,
            data_gaps: ledger.gaps,
            rejections: ledger.rejections,
            exclusions: ledger.exclusions,
            aborted,
        })
    }

    fn abort_requested(&self) -> bool {
        self.abort
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// One time step: close due positions, scan the universe, then commit
    /// new entries in rank order.
    fn step(
        &self,
        mut state: PortfolioState,
        date: NaiveDate,
        universe: &[UniverseMember],
        ledger: &mut RunLedger,
    ) -> PortfolioState {
        for symbol in state.due_for_exit(date) {
            let reason = state
                .positions
                .get(&symbol)
                .map(|p| p.exit_reason)
                .unwrap_or(ExitReason::HoldingPeriod);
            state = self.exit(state, &symbol, date, reason, ledger);
        }

        let report = self
            .generator
            .scan(universe, self.estimates, date, self.config.mode);

        ledger.signals_generated += report
            .signals
            .iter()
            .filter(|s| !state.is_held(&s.symbol))
            .count();
        ledger.rejections.policy_rejections += report.rejections.len();
        ledger.gaps.sector_fallbacks += report.sector_fallbacks;
        ledger.gaps.look_ahead_filtered += report.look_ahead_filtered;
        for exclusion in &report.exclusions {
            ledger.exclude(date, &exclusion.symbol, GapKind::InvalidInput, exclusion.reason.clone());
        }

        for signal in &report.signals {
            state = self.enter(state, signal, date, ledger);
        }
        state
    }

    fn enter(
        &self,
        state: PortfolioState,
        signal: &Signal,
        date: NaiveDate,
        ledger: &mut RunLedger,
    ) -> PortfolioState {
        if state.is_held(&signal.symbol) {
            ledger.rejections.already_held += 1;
            return state;
        }

        let price = match self
            .prices
            .price(&signal.symbol, date)
            .filter(|p| *p > Decimal::ZERO)
        {
            Some(p) => p,
            None => {
                tracing::debug!(symbol = %signal.symbol, %date, "No entry price");
                ledger.exclude(
                    date,
                    &signal.symbol,
                    GapKind::MissingEntryPrice,
                    format!("no price on {}", date),
                );
                return state;
            }
        };

        let exposure = state.exposure();
        let size = self.sizer.size(
            signal,
            state.value().to_f64().unwrap_or(0.0),
            exposure.to_f64().unwrap_or(f64::NAN),
        );
        let cost = Decimal::from_f64(size)
            .unwrap_or(Decimal::ZERO)
            .min(state.cash)
            .round_dp(2);
        if cost <= Decimal::ZERO {
            ledger.rejections.sizing_rejections += 1;
            return state;
        }

        let (planned_exit, exit_reason) = self.planned_exit(signal, date);
        tracing::debug!(symbol = %signal.symbol, %date, %cost, %planned_exit, "Opening position");

        state.open(OpenPosition {
            symbol: signal.symbol.clone(),
            entry_date: date,
            entry_price: price,
            shares: cost / price,
            cost,
            planned_exit,
            exit_reason,
            signal_confidence: signal.confidence_score,
        })
    }

    fn exit(
        &self,
        state: PortfolioState,
        symbol: &str,
        date: NaiveDate,
        reason: ExitReason,
        ledger: &mut RunLedger,
    ) -> PortfolioState {
        match self.prices.price(symbol, date) {
            Some(price) => {
                let (state, trade) = state.close(symbol, date, price, reason);
                if let Some(trade) = trade {
                    ledger.trades.push(trade);
                }
                state
            }
            None => {
                tracing::debug!(symbol = %symbol, %date, "No exit price, excluding trade");
                ledger.exclude(
                    date,
                    symbol,
                    GapKind::MissingExitPrice,
                    format!("no price on {}", date),
                );
                state.release(symbol)
            }
        }
    }

    /// Holding windows past the end of the calendar never come due and are
    /// closed with the rest of the book at the end of the run.
    fn planned_exit(&self, signal: &Signal, entry: NaiveDate) -> (NaiveDate, ExitReason) {
        let after = |days: i64| {
            entry
                .checked_add_days(Days::new(days.max(0) as u64))
                .unwrap_or(NaiveDate::MAX)
        };
        match self.config.holding_period {
            HoldingPeriod::FixedDays { days } => (after(days), ExitReason::HoldingPeriod),
            HoldingPeriod::NextEarnings { fallback_days } => match signal.earnings_date {
                Some(earnings) if earnings > entry => (earnings, ExitReason::EarningsDate),
                _ => (after(fallback_days), ExitReason::HoldingPeriod),
            },
        }
    }
}

fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// First weekday on or after `date`.
fn next_trading_day(mut date: NaiveDate) -> Option<NaiveDate> {
    while !is_trading_day(date) {
        date = date.succ_opt()?;
    }
    Some(date)
}

/// The weekday `count` weekdays after `date`, or `None` once that passes `end`.
fn advance_trading_days(mut date: NaiveDate, count: i64, end: NaiveDate) -> Option<NaiveDate> {
    for _ in 0..count {
        date = next_trading_day(date.succ_opt()?)?;
        if date > end {
            return None;
        }
    }
    Some(date)
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_trading_days() {
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert!(!is_trading_day(saturday));
        assert!(!is_trading_day(saturday + Duration::days(1)));
        assert!(is_trading_day(monday));
    }

    #[test]
    fn test_advance_counts_weekdays() {
        let friday = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let saturday = friday + Duration::days(1);
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();

        assert_eq!(next_trading_day(saturday), Some(friday + Duration::days(3)));
        assert_eq!(advance_trading_days(friday, 1, end), Some(friday + Duration::days(3)));
        assert_eq!(advance_trading_days(friday, 5, end), Some(friday + Duration::days(7)));
        assert_eq!(advance_trading_days(friday, 5, friday + Duration::days(6)), None);
        // Huge steps stop at the end date instead of walking the calendar
        assert_eq!(advance_trading_days(friday, i64::MAX, end), None);
    }
}
