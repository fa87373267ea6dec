//! The simulation clock.
//!
//! Walks the 1-minute stream one bar at a time. The cursor after bar `i` is
//! its open plus one minute, and nothing the strategy or the stop logic sees
//! on that tick extends past the cursor.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{debug, info};

use common::{
    aggregate, partial_bar, BarSeries, Candle, ClosedTrade, Config, EndOfDataPolicy, Error,
    ExitReason, PortfolioState, Position, Result, Timeframe,
};
use paper::PaperBroker;
use risk::{trailing, PositionSizer, RiskConfig, RiskManager};
use strategy::{DetectorState, Strategy, StrategySettings};

use crate::executor::OrderExecutor;

/// Account and loop settings shared by every strategy run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    pub max_notional_fraction: f64,
    /// Fine bars skipped before the clock starts.
    pub warmup_bars: usize,
    pub end_of_data: EndOfDataPolicy,
    pub risk: RiskConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl BacktestConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            initial_capital: cfg.initial_capital,
            commission_rate: cfg.commission_rate,
            slippage_rate: cfg.slippage_rate,
            max_notional_fraction: cfg.max_notional_fraction,
            warmup_bars: cfg.warmup_bars,
            end_of_data: cfg.end_of_data,
            risk: RiskConfig::from_config(cfg),
        }
    }
}

/// Equity at the last bar of a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthEnd {
    pub year: i32,
    pub month: u32,
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub settings: StrategySettings,
    pub config: BacktestConfig,
    pub trades: Vec<ClosedTrade>,
    /// Positions left open under `EndOfDataPolicy::Exclude`.
    pub open_positions: Vec<Position>,
    pub portfolio: PortfolioState,
    pub month_ends: Vec<MonthEnd>,
    pub bars_processed: usize,
    pub evaluations: usize,
    pub signals: usize,
    pub rejected_signals: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// One strategy over one candle series.
pub struct Backtest<'a> {
    config: &'a BacktestConfig,
    strategy: &'a dyn Strategy,
}

impl<'a> Backtest<'a> {
    pub fn new(config: &'a BacktestConfig, strategy: &'a dyn Strategy) -> Self {
        Self { config, strategy }
    }

    pub fn run(&self, fine: &BarSeries) -> Result<BacktestResult> {
        let settings = self.strategy.settings();
        validate_inputs(fine, settings)?;
        let fine_tf = fine.timeframe();
        let signal_tf = settings.signal_timeframe;
        let coarse = aggregate(fine, signal_tf)?;
        let cadence = Timeframe::from_minutes(settings.check_every_minutes)?;
        let step = fine_tf.duration();

        let mut executor = OrderExecutor::new(
            self.config.symbol.clone(),
            PositionSizer::new(settings.risk_fraction, self.config.max_notional_fraction),
            RiskManager::new(self.config.risk, self.config.initial_capital),
            PaperBroker::new(
                self.config.initial_capital,
                self.config.commission_rate,
                self.config.slippage_rate,
            ),
        );

        info!(
            strategy = %self.strategy.name(),
            symbol = %self.config.symbol,
            timeframe = %signal_tf,
            fine_bars = fine.len(),
            coarse_bars = coarse.len(),
            warmup = self.config.warmup_bars,
            "Backtest starting"
        );

        let bars = fine.bars();
        let mut state = DetectorState::default();
        let mut window: Vec<Candle> = Vec::with_capacity(settings.history_bars + 1);
        let mut month_ends: Vec<MonthEnd> = Vec::new();
        let mut evaluations = 0usize;
        let mut signals = 0usize;
        let mut last: Option<(DateTime<Utc>, f64)> = None;

        for bar in bars.iter().skip(self.config.warmup_bars) {
            if !bar.is_complete() {
                continue;
            }
            let cursor = bar.timestamp + step;
            executor.on_bar(bar.timestamp);

            if let Some(position) = executor.position_mut() {
                position.track_extremes(bar);
            }

            let mut opened_now = false;
            if cadence.is_boundary(cursor) {
                let closed = coarse.closed_before(cursor);
                let from = closed.len().saturating_sub(settings.history_bars);
                window.clear();
                window.extend_from_slice(&closed[from..]);
                window.extend(partial_bar(bars, fine_tf, signal_tf, cursor));

                let (next, signal) = self.strategy.evaluate(state, &window);
                state = next;
                evaluations += 1;

                if let Some(signal) = signal {
                    signals += 1;
                    debug!(time = %cursor, side = %signal.side, reason = %signal.reason, "Signal");
                    opened_now = executor.try_open(cursor, &signal)?.is_some();
                }
            }

            if !opened_now {
                self.manage_position(&mut executor, bar, cursor)?;
            }

            let equity = executor.mark(bar.close);
            record_month_end(&mut month_ends, cursor, equity);
            last = Some((cursor, bar.close));
        }

        let mut open_positions = Vec::new();
        if let Some((time, close)) = last {
            match self.config.end_of_data {
                EndOfDataPolicy::ForceClose => {
                    if executor.position().is_some() {
                        executor.close(time, close, ExitReason::EndOfData, true)?;
                        let equity = executor.mark(close);
                        record_month_end(&mut month_ends, time, equity);
                    }
                }
                EndOfDataPolicy::Exclude => {
                    open_positions.extend(executor.position().cloned());
                }
            }
        }

        let rejected_signals = executor.rejected();
        let broker = executor.into_broker();
        let result = BacktestResult {
            strategy: self.strategy.name().to_string(),
            settings: settings.clone(),
            config: self.config.clone(),
            trades: broker.trades().to_vec(),
            open_positions,
            portfolio: *broker.portfolio(),
            month_ends,
            bars_processed: bars.len().saturating_sub(self.config.warmup_bars),
            evaluations,
            signals,
            rejected_signals,
            start: bars.get(self.config.warmup_bars).map(|c| c.timestamp),
            end: last.map(|(t, _)| t),
        };

        info!(
            strategy = %result.strategy,
            trades = result.trades.len(),
            signals,
            final_equity = result.portfolio.equity,
            "Backtest finished"
        );
        Ok(result)
    }

    /// Trail the stop on the bar close, then check whether the bar touched it.
    fn manage_position(
        &self,
        executor: &mut OrderExecutor,
        bar: &Candle,
        cursor: DateTime<Utc>,
    ) -> Result<()> {
        let Some(position) = executor.position_mut() else {
            return Ok(());
        };
        let atr = position.atr_at_entry;
        let update = trailing::update_position(position, bar.close, atr);
        if update != trailing::StopUpdate::Hold {
            debug!(
                time = %cursor,
                stop = position.current_stop,
                phase = %position.phase,
                "Stop moved"
            );
        }

        if !position.stop_breached(bar) {
            return Ok(());
        }
        let stop = position.current_stop;
        // A bar that opens beyond the stop fills at the open.
        let price = if position.side.pierces(bar.open, stop) {
            bar.open
        } else {
            stop
        };
        let reason = ExitReason::for_stop(position.phase);
        executor.close(cursor, price, reason, false)?;
        Ok(())
    }
}

fn record_month_end(month_ends: &mut Vec<MonthEnd>, time: DateTime<Utc>, equity: f64) {
    // Bars closing exactly at midnight on the 1st still belong to the old month.
    let stamp = time - chrono::Duration::nanoseconds(1);
    let (year, month) = (stamp.year(), stamp.month());
    match month_ends.last_mut() {
        Some(m) if m.year == year && m.month == month => m.equity = equity,
        _ => month_ends.push(MonthEnd {
            year,
            month,
            equity,
        }),
    }
}

/// Check that `fine` can drive `settings` before spending time on a run.
pub fn validate_inputs(fine: &BarSeries, settings: &StrategySettings) -> Result<()> {
    if !settings.signal_timeframe.is_multiple_of(fine.timeframe()) {
        return Err(Error::Config(format!(
            "{} signal bars cannot be built from {} data",
            settings.signal_timeframe,
            fine.timeframe()
        )));
    }
    if fine.is_empty() {
        return Err(Error::Data("no candles to backtest".into()));
    }
    Ok(())
}
