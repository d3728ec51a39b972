//! Historical replay of consensus signals.
//!
//! [`BacktestEngine`] walks trading days in order, asks the signal engine
//! what qualified using only estimates published by each day, sizes entries
//! with the position sizer and reports trade-level performance.

pub mod calibration;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod portfolio;


pub use engine::BacktestEngine;
pub use metrics::{compute_trade_metrics, TradeMetrics};
pub use models::*;
pub use portfolio::{OpenPosition, PortfolioState};
