use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::*;

use crate::models::{ExitReason, TradeOutcome};

/// An open position being tracked during the backtest.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: Decimal,
    pub shares: Decimal,
    /// Cash deployed at entry
    pub cost: Decimal,
    pub planned_exit: NaiveDate,
    pub exit_reason: ExitReason,
    pub signal_confidence: f64,
}

impl OpenPosition {
    /// Realize the position at `exit_price`.
    pub fn close(&self, exit_date: NaiveDate, exit_price: Decimal, reason: ExitReason) -> TradeOutcome {
        let proceeds = self.shares * exit_price;
        let profit_loss = proceeds - self.cost;
        let return_pct = if self.entry_price > Decimal::ZERO {
            ((exit_price - self.entry_price) / self.entry_price)
                .to_f64()
                .unwrap_or(0.0)
                * 100.0
        } else {
            0.0
        };

        TradeOutcome {
            symbol: self.symbol.clone(),
            entry_date: self.entry_date,
            exit_date,
            entry_price: self.entry_price,
            exit_price,
            return_pct,
            signal_confidence: self.signal_confidence,
            shares: self.shares,
            profit_loss,
            holding_period_days: (exit_date - self.entry_date).num_days(),
            exit_reason: reason,
        }
    }
}

/// Portfolio state threaded through the time steps of a backtest.
///
/// Each step consumes the previous state and returns the next one; nothing
/// else holds a mutable reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub cash: Decimal,
    pub positions: BTreeMap<String, OpenPosition>,
}

impl PortfolioState {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            cash: initial_capital,
            positions: BTreeMap::new(),
        }
    }

    /// Capital deployed in open positions, at cost.
    pub fn exposure(&self) -> Decimal {
        self.positions.values().map(|p| p.cost).sum()
    }

    /// Cash plus open positions at cost.
    pub fn value(&self) -> Decimal {
        self.cash + self.exposure()
    }

    pub fn is_held(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Symbols whose planned exit is on or before `date`, in symbol order.
    pub fn due_for_exit(&self, date: NaiveDate) -> Vec<String> {
        self.positions
            .values()
            .filter(|p| p.planned_exit <= date)
            .map(|p| p.symbol.clone())
            .collect()
    }

    pub fn open(mut self, position: OpenPosition) -> Self {
        self.cash -= position.cost;
        self.positions.insert(position.symbol.clone(), position);
        self
    }

    /// Close a position at a price, returning the realized trade.
    pub fn close(
        mut self,
        symbol: &str,
        date: NaiveDate,
        price: Decimal,
        reason: ExitReason,
    ) -> (Self, Option<TradeOutcome>) {
        match self.positions.remove(symbol) {
            Some(position) => {
                let trade = position.close(date, price, reason);
                self.cash += position.shares * price;
                (self, Some(trade))
            }
            None => (self, None),
        }
    }

    /// Drop a position without a trade, returning its cost to cash.
    pub fn release(mut self, symbol: &str) -> Self {
        if let Some(position) = self.positions.remove(symbol) {
            self.cash += position.cost;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn position(symbol: &str, cost: Decimal, price: Decimal) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            entry_date: date("2024-01-02"),
            entry_price: price,
            shares: cost / price,
            cost,
            planned_exit: date("2024-01-09"),
            exit_reason: ExitReason::HoldingPeriod,
            signal_confidence: 88.0,
        }
    }

    #[test]
    fn test_open_and_close_round_trip() {
        let state = PortfolioState::new(dec!(100000));
        let state = state.open(position("AAPL", dec!(10000), dec!(100)));
        assert_eq!(state.cash, dec!(90000));
        assert_eq!(state.exposure(), dec!(10000));
        assert_eq!(state.value(), dec!(100000));
        assert!(state.is_held("AAPL"));

        let (state, trade) = state.close("AAPL", date("2024-01-09"), dec!(110), ExitReason::HoldingPeriod);
        let trade = trade.unwrap();
        assert_eq!(trade.profit_loss, dec!(1000));
        assert!((trade.return_pct - 10.0).abs() < 1e-9);
        assert_eq!(trade.holding_period_days, 7);
        assert_eq!(state.cash, dec!(101000));
        assert!(state.positions.is_empty());
    }

    #[test]
    fn test_release_returns_cost() {
        let state = PortfolioState::new(dec!(50000)).open(position("MSFT", dec!(5000), dec!(400)));
        let state = state.release("MSFT");
        assert_eq!(state.cash, dec!(50000));
        assert_eq!(state.exposure(), Decimal::ZERO);
    }

    #[test]
    fn test_due_for_exit() {
        let state = PortfolioState::new(dec!(50000))
            .open(position("MSFT", dec!(5000), dec!(400)))
            .open(OpenPosition {
                planned_exit: date("2024-02-01"),
                ..position("AAPL", dec!(5000), dec!(200))
            });
        assert_eq!(state.due_for_exit(date("2024-01-09")), vec!["MSFT".to_string()]);
        assert!(state.due_for_exit(date("2024-01-08")).is_empty());
    }

    #[test]
    fn test_closing_unknown_symbol_is_noop() {
        let state = PortfolioState::new(dec!(1000));
        let (state, trade) = state.close("NOPE", date("2024-01-09"), dec!(10), ExitReason::EndOfBacktest);
        assert!(trade.is_none());
        assert_eq!(state.cash, dec!(1000));
    }
}
