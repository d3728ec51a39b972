use anyhow::{Context, Result};
use backtest_engine::{BacktestConfig, BacktestEngine};
use position_sizer::PositionSizer;
use signal_engine::SignalGenerator;

mod config;
mod report;
mod snapshot;

use config::{AgentConfig, BacktestWindow, RunMode};
use report::LiveReport;
use snapshot::Snapshot;

fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    // Logs go to stderr so stdout carries only the JSON report
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!("Starting consensus signal agent");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Optimization mode: {}", config.engine.mode);
    tracing::info!(
        "  Max position: {:.0}%, exposure ceiling: {:.0}%",
        config.sizing.max_position_fraction * 100.0,
        config.sizing.max_total_exposure_fraction * 100.0
    );

    // 3. Load the snapshot into in-memory providers
    let snapshot = Snapshot::load(&config.snapshot_path)?;
    tracing::info!(
        symbols = snapshot.universe.len(),
        estimates = snapshot.estimates.len(),
        prices = snapshot.prices.len(),
        "Snapshot loaded from {}",
        config.snapshot_path.display()
    );
    let (universe, estimates, prices) = snapshot.into_providers();

    let generator =
        SignalGenerator::from_config(&config.engine).context("Failed to build signal generator")?;

    // 4. Run
    let output = match &config.run {
        RunMode::Live { as_of } => {
            let sizer = PositionSizer::new(config.sizing.clone())?;
            let scan = generator.scan(&universe, &estimates, *as_of, config.engine.mode);
            tracing::info!(
                signals = scan.signals.len(),
                rejected = scan.rejections.len(),
                excluded = scan.exclusions.len(),
                "Scan complete as of {}",
                as_of
            );
            let report = LiveReport::build(
                scan,
                &sizer,
                *as_of,
                config.engine.mode,
                config.portfolio_value,
                config.max_signals,
            );
            serde_json::to_string_pretty(&report)?
        }
        RunMode::Backtest(window) => {
            let engine = BacktestEngine::new(
                backtest_config(&config, window),
                &generator,
                &estimates,
                &prices,
            )?;
            let result = engine.run(
                window.start_date,
                window.end_date,
                &universe,
                window.initial_capital,
            )?;
            serde_json::to_string_pretty(&result)?
        }
        RunMode::Calibrate(window) => {
            let engine = BacktestEngine::new(
                backtest_config(&config, window),
                &generator,
                &estimates,
                &prices,
            )?;
            let rows = engine.calibrate_modes(
                window.start_date,
                window.end_date,
                &universe,
                window.initial_capital,
            )?;
            serde_json::to_string_pretty(&rows)?
        }
    };

    println!("{}", output);
    Ok(())
}

fn backtest_config(config: &AgentConfig, window: &BacktestWindow) -> BacktestConfig {
    BacktestConfig {
        mode: config.engine.mode,
        holding_period: window.holding_period,
        step_days: window.step_days,
        sizing: config.sizing.clone(),
        ..BacktestConfig::default()
    }
}
