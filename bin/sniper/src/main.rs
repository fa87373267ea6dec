use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{BarSeries, Config, Error, Result};
use engine::{Backtest, BacktestConfig, PerformanceReport};
use strategy::{Strategy, StrategyFileConfig, StrategyRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Backtest run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(
        symbol = %cfg.symbol,
        data = %cfg.data_path.display(),
        capital = cfg.initial_capital,
        end_of_data = ?cfg.end_of_data,
        "Sniper backtester starting"
    );

    // ── Data ──────────────────────────────────────────────────────────────────
    let loaded = engine::load_csv(&cfg.data_path)?;
    let series = Arc::new(loaded.series);

    // ── Strategy registry ─────────────────────────────────────────────────────
    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    let registry = StrategyRegistry::from_config(&strategy_file)?;
    info!(count = registry.len(), "Strategies loaded");

    // ── Runs ──────────────────────────────────────────────────────────────────
    // Each run owns its broker, risk manager and detector state; only the
    // candles are shared.
    let backtest_cfg = Arc::new(BacktestConfig::from_config(&cfg));
    let mut handles = Vec::new();
    for strategy in registry.into_strategies() {
        if strategy.pair() != cfg.symbol {
            warn!(
                strategy = %strategy.name(),
                pair = %strategy.pair(),
                symbol = %cfg.symbol,
                "Skipping strategy for a different pair"
            );
            continue;
        }
        let series = Arc::clone(&series);
        let backtest_cfg = Arc::clone(&backtest_cfg);
        let dir = engine::artifact_dir(&cfg.output_dir, strategy.name());
        let name = strategy.name().to_string();
        let handle = tokio::task::spawn_blocking(move || {
            run_one(&backtest_cfg, strategy.as_ref(), &series, &dir)
        });
        handles.push((name, handle));
    }

    if handles.is_empty() {
        return Err(Error::Config(format!(
            "no configured strategy trades {}",
            cfg.symbol
        )));
    }

    let mut failures = 0usize;
    for (name, handle) in handles {
        let outcome = handle
            .await
            .map_err(|e| Error::StateInvariant(format!("backtest task '{name}' aborted: {e}")))?;
        match outcome {
            Ok(report) => info!(
                strategy = %name,
                trades = report.total_trades,
                win_rate_pct = report.win_rate * 100.0,
                avg_r = report.avg_r,
                return_pct = report.total_return_pct,
                max_drawdown_pct = report.max_drawdown_pct,
                "Backtest complete"
            ),
            Err(e) => {
                error!(strategy = %name, error = %e, "Backtest failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(Error::StateInvariant(format!("{failures} backtest(s) failed")));
    }
    info!(output = %cfg.output_dir.display(), "All backtests finished");
    Ok(())
}

fn run_one(
    cfg: &BacktestConfig,
    strategy: &dyn Strategy,
    series: &BarSeries,
    dir: &std::path::Path,
) -> Result<PerformanceReport> {
    let result = Backtest::new(cfg, strategy).run(series)?;
    engine::write_artifacts(dir, &result)
}
