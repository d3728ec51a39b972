use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use backtest_engine::HoldingPeriod;
use chrono::{NaiveDate, Utc};
use position_sizer::SizingConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_engine::EngineConfig;

/// Historical window for a backtest or calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub holding_period: HoldingPeriod,
    pub step_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "run", rename_all = "snake_case")]
pub enum RunMode {
    /// Scan the snapshot once as of a date and size the ranked signals
    Live { as_of: NaiveDate },
    Backtest(BacktestWindow),
    /// Backtest the window under every optimization mode
    Calibrate(BacktestWindow),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub engine: EngineConfig,
    pub sizing: SizingConfig,

    // Input
    pub snapshot_path: PathBuf,

    // Output
    pub run: RunMode,
    pub portfolio_value: f64,       // Sizing basis for live signals
    pub max_signals: Option<usize>, // Print only the top N
}

impl AgentConfig {
    /// Read configuration from the environment; the snapshot path may also be
    /// given as the first command-line argument.
    pub fn from_env() -> Result<Self> {
        let engine = EngineConfig::from_env().context("Invalid signal engine configuration")?;
        let sizing = SizingConfig::from_env()?;
        Self::from_parts(engine, sizing, |name| env::var(name).ok(), env::args().nth(1))
    }

    fn from_parts(
        engine: EngineConfig,
        sizing: SizingConfig,
        var: impl Fn(&str) -> Option<String>,
        arg: Option<String>,
    ) -> Result<Self> {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let snapshot_path = match arg.or_else(|| var("SNAPSHOT_PATH")) {
            Some(path) => PathBuf::from(path),
            None => bail!("No snapshot given: pass a path or set SNAPSHOT_PATH"),
        };

        let date = |name: &str| -> Result<Option<NaiveDate>> {
            var(name)
                .map(|raw| {
                    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                        .with_context(|| format!("{} must be a YYYY-MM-DD date, got '{}'", name, raw))
                })
                .transpose()
        };

        let window = match (date("BACKTEST_START")?, date("BACKTEST_END")?) {
            (Some(start_date), Some(end_date)) => {
                if start_date > end_date {
                    bail!("BACKTEST_START {} is after BACKTEST_END {}", start_date, end_date);
                }
                let initial_capital: Decimal = var("INITIAL_CAPITAL")
                    .unwrap_or_else(|| "100000".to_string())
                    .trim()
                    .parse()
                    .context("INITIAL_CAPITAL must be a decimal amount")?;
                if initial_capital <= Decimal::ZERO {
                    bail!("INITIAL_CAPITAL must be positive");
                }
                let holding_period = match var("HOLDING_DAYS") {
                    Some(raw) => HoldingPeriod::FixedDays {
                        days: raw.trim().parse().context("HOLDING_DAYS must be an integer")?,
                    },
                    None => HoldingPeriod::default(),
                };
                let step_days = var("STEP_DAYS")
                    .unwrap_or_else(|| "1".to_string())
                    .trim()
                    .parse()
                    .context("STEP_DAYS must be an integer")?;
                Some(BacktestWindow {
                    start_date,
                    end_date,
                    initial_capital,
                    holding_period,
                    step_days,
                })
            }
            (None, None) => None,
            _ => bail!("BACKTEST_START and BACKTEST_END must be set together"),
        };

        let calibrate = var("CALIBRATE_MODES")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let run = match window {
            Some(window) if calibrate => RunMode::Calibrate(window),
            Some(window) => RunMode::Backtest(window),
            None if calibrate => bail!("CALIBRATE_MODES needs BACKTEST_START and BACKTEST_END"),
            None => RunMode::Live {
                as_of: date("AS_OF")?.unwrap_or_else(|| Utc::now().date_naive()),
            },
        };

        let portfolio_value: f64 = var("PORTFOLIO_VALUE")
            .unwrap_or_else(|| "100000".to_string())
            .trim()
            .parse()
            .context("PORTFOLIO_VALUE must be a number")?;
        if !portfolio_value.is_finite() || portfolio_value <= 0.0 {
            bail!("PORTFOLIO_VALUE must be positive");
        }

        let max_signals = var("MAX_SIGNALS")
            .map(|raw| raw.trim().parse::<usize>())
            .transpose()
            .context("MAX_SIGNALS must be a non-negative integer")?;

        Ok(Self {
            engine,
            sizing,
            snapshot_path,
            run,
            portfolio_value,
            max_signals,
        })
    }
}
