use chrono::{DateTime, Duration, TimeZone, Utc};

use common::{
    BarSeries, Candle, EndOfDataPolicy, EntrySignal, Error, ExitReason, Side, Timeframe,
    TrailConfig,
};
use engine::{report, Backtest, BacktestConfig, PerformanceReport};
use strategy::{DetectorState, Strategy, StrategySettings, SweepStrategy};

/// Enters at the last close with a fixed stop distance.
struct FixedEntry {
    settings: StrategySettings,
    side: Side,
    stop_distance: f64,
    repeat: bool,
}

impl FixedEntry {
    fn new(stop_distance: f64, repeat: bool) -> Self {
        Self::with_side(Side::Long, stop_distance, repeat)
    }

    fn short(stop_distance: f64) -> Self {
        Self::with_side(Side::Short, stop_distance, false)
    }

    fn with_side(side: Side, stop_distance: f64, repeat: bool) -> Self {
        let mut settings = strategy::profile("shadow_sniper").unwrap();
        settings.name = "fixed-entry".into();
        settings.pair = "BTCUSDT".into();
        settings.signal_timeframe = Timeframe::M15;
        settings.check_every_minutes = 15;
        Self {
            settings,
            side,
            stop_distance,
            repeat,
        }
    }
}

impl Strategy for FixedEntry {
    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn evaluate(
        &self,
        mut state: DetectorState,
        bars: &[Candle],
    ) -> (DetectorState, Option<EntrySignal>) {
        if state.long.attempted && !self.repeat {
            return (state, None);
        }
        let Some(last) = bars.last() else {
            return (state, None);
        };
        state.long.attempted = true;
        let signal = EntrySignal {
            side: self.side,
            entry_price: last.close,
            initial_stop: last.close - self.side.sign() * self.stop_distance,
            atr: 50.0,
            reason: "fixed entry".into(),
            size_multiplier: 1.0,
            trail: TrailConfig::default(),
        };
        (state, Some(signal))
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

fn at(minute: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minute)
}

fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp: at(i as i64),
        open,
        high,
        low,
        close,
        volume: 10.0,
    }
}

fn flat(i: usize, price: f64) -> Candle {
    candle(i, price, price, price, price)
}

/// `n` flat minutes at 1000, then `tail` appended in order.
fn series(n: usize, tail: &[(f64, f64, f64, f64)]) -> BarSeries {
    let mut bars: Vec<Candle> = (0..n).map(|i| flat(i, 1_000.0)).collect();
    for (k, &(o, h, l, c)) in tail.iter().enumerate() {
        bars.push(candle(n + k, o, h, l, c));
    }
    BarSeries::new(Timeframe::M1, bars).unwrap()
}

fn frictionless() -> BacktestConfig {
    BacktestConfig {
        commission_rate: 0.0,
        slippage_rate: 0.0,
        ..BacktestConfig::default()
    }
}

#[test]
fn gap_through_stop_fills_at_open() {
    // Entry on the 00:15 tick at 1000, stop 900. Bar 16 opens at 850.
    let mut tail = vec![(1_000.0, 1_000.0, 1_000.0, 1_000.0), (850.0, 860.0, 840.0, 855.0)];
    tail.extend((0..5).map(|_| (855.0, 855.0, 855.0, 855.0)));
    let fine = series(15, &tail);
    let strategy = FixedEntry::new(100.0, false);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_time, at(15));
    assert_eq!(trade.exit_time, at(17));
    assert_eq!(trade.entry_price, 1_000.0);
    assert_eq!(trade.exit_price, 850.0);
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert!((trade.quantity - 1.0).abs() < 1e-12);
    assert!((trade.pnl + 150.0).abs() < 1e-9);
    assert!((trade.pnl_r + 1.5).abs() < 1e-9);
    assert!(!trade.forced);
}

#[test]
fn short_stops_out_when_the_high_reaches_the_stop() {
    // Short at 1000 on the 00:15 tick, stop 1100.
    let tail = [
        (1_000.0, 1_000.0, 1_000.0, 1_000.0),
        (1_020.0, 1_110.0, 1_010.0, 1_050.0),
        (1_050.0, 1_050.0, 1_050.0, 1_050.0),
    ];
    let fine = series(15, &tail);
    let strategy = FixedEntry::short(100.0);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.side, Side::Short);
    assert_eq!(trade.exit_time, at(17));
    assert_eq!(trade.exit_price, 1_100.0);
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert!((trade.pnl + 100.0).abs() < 1e-9);
    assert!((trade.pnl_r + 1.0).abs() < 1e-9);
}

#[test]
fn short_gap_above_stop_fills_at_open() {
    let tail = [
        (1_000.0, 1_000.0, 1_000.0, 1_000.0),
        (1_150.0, 1_160.0, 1_140.0, 1_145.0),
        (1_145.0, 1_145.0, 1_145.0, 1_145.0),
    ];
    let fine = series(15, &tail);
    let strategy = FixedEntry::short(100.0);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_price, 1_150.0);
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert!((trade.pnl_r + 1.5).abs() < 1e-9);
}

#[test]
fn breakeven_then_trailing_exit() {
    let tail = [
        // Opens at 1000 on the previous tick. 1.5R at 1150 parks the stop at entry.
        (1_140.0, 1_150.0, 1_140.0, 1_150.0),
        // New high 1300: chandelier at 1300 - 3 x 50 = 1150.
        (1_160.0, 1_300.0, 1_160.0, 1_290.0),
        // Trades down through 1150 without gapping.
        (1_200.0, 1_200.0, 1_100.0, 1_120.0),
    ];
    let fine = series(15, &tail);
    let strategy = FixedEntry::new(100.0, false);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
    assert_eq!(trade.exit_price, 1_150.0);
    assert!((trade.pnl_r - 1.5).abs() < 1e-9);
}

#[test]
fn force_close_at_end_of_data() {
    let mut tail: Vec<_> = (0..24).map(|_| (1_000.0, 1_000.0, 1_000.0, 1_000.0)).collect();
    tail.push((1_000.0, 1_010.0, 1_000.0, 1_010.0));
    let fine = series(15, &tail);
    let strategy = FixedEntry::new(100.0, false);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.trades.len(), 1);
    assert!(result.open_positions.is_empty());
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::EndOfData);
    assert!(trade.forced);
    assert_eq!(trade.exit_time, at(40));
    assert!((trade.pnl - 10.0).abs() < 1e-9);

    let summary = PerformanceReport::from_result(&result);
    assert_eq!(summary.forced_closes, 1);
    assert_eq!(summary.open_positions_excluded, 0);
}

#[test]
fn exclude_leaves_position_out_of_stats() {
    let mut tail: Vec<_> = (0..24).map(|_| (1_000.0, 1_000.0, 1_000.0, 1_000.0)).collect();
    tail.push((1_000.0, 1_010.0, 1_000.0, 1_010.0));
    let fine = series(15, &tail);
    let strategy = FixedEntry::new(100.0, false);
    let cfg = BacktestConfig {
        end_of_data: EndOfDataPolicy::Exclude,
        ..frictionless()
    };

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert!(result.trades.is_empty());
    assert_eq!(result.open_positions.len(), 1);

    let summary = PerformanceReport::from_result(&result);
    assert_eq!(summary.total_trades, 0);
    assert_eq!(summary.open_positions_excluded, 1);
    assert!((summary.final_equity - 10_010.0).abs() < 1e-9);
}

#[test]
fn signals_while_open_are_ignored() {
    let fine = series(61, &[]);
    let strategy = FixedEntry::new(100.0, true);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    // Ticks at 00:15, 00:30, 00:45 and 01:00.
    assert_eq!(result.evaluations, 4);
    assert_eq!(result.signals, 4);
    assert_eq!(result.rejected_signals, 0);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].entry_time, at(15));
}

#[test]
fn warmup_delays_the_first_tick() {
    let fine = series(40, &[]);
    let strategy = FixedEntry::new(100.0, false);
    let cfg = BacktestConfig {
        warmup_bars: 20,
        ..frictionless()
    };

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.start, Some(at(20)));
    assert_eq!(result.trades[0].entry_time, at(30));
}

#[test]
fn degenerate_stop_is_counted_not_fatal() {
    let fine = series(30, &[]);
    let strategy = FixedEntry::new(0.0, false);
    let cfg = frictionless();

    let result = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    assert_eq!(result.signals, 1);
    assert_eq!(result.rejected_signals, 1);
    assert!(result.trades.is_empty());
}

#[test]
fn coarse_data_for_fine_signals_is_rejected() {
    let bars = (0..10)
        .map(|i| Candle {
            timestamp: t0() + Duration::hours(i),
            ..flat(0, 1_000.0)
        })
        .collect();
    let fine = BarSeries::new(Timeframe::H1, bars).unwrap();
    let strategy = FixedEntry::new(100.0, false);
    let cfg = frictionless();

    let err = Backtest::new(&cfg, &strategy).run(&fine).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

fn wave(n: usize) -> BarSeries {
    let bars = (0..n)
        .map(|i| {
            let x = i as f64;
            let mid = 20_000.0 + 400.0 * (x / 97.0).sin() + 150.0 * (x / 23.0).sin();
            let close = mid + 30.0 * (x / 5.0).cos();
            Candle {
                timestamp: at(i as i64),
                open: mid,
                high: mid.max(close) + 25.0,
                low: mid.min(close) - 25.0 - 60.0 * ((x / 41.0).sin().max(0.0)),
                close,
                volume: 100.0 + 50.0 * (x / 13.0).sin().abs(),
            }
        })
        .collect();
    BarSeries::new(Timeframe::M1, bars).unwrap()
}

#[test]
fn identical_inputs_give_identical_trade_logs() {
    let mut settings = strategy::profile("turbo_sniper").unwrap();
    settings.name = "turbo".into();
    settings.pair = "BTCUSDT".into();
    settings.detector.min_bars = 30;
    let strategy = SweepStrategy::new(settings);
    let cfg = BacktestConfig::default();
    let fine = wave(6_000);

    let a = Backtest::new(&cfg, &strategy).run(&fine).unwrap();
    let b = Backtest::new(&cfg, &strategy).run(&fine).unwrap();

    assert_eq!(a.trades, b.trades);
    assert_eq!(a.evaluations, b.evaluations);
    assert_eq!(
        report::trades_csv(&a.trades).unwrap(),
        report::trades_csv(&b.trades).unwrap()
    );
    assert_eq!(
        report::summary_json(&PerformanceReport::from_result(&a)).unwrap(),
        report::summary_json(&PerformanceReport::from_result(&b)).unwrap()
    );
}
