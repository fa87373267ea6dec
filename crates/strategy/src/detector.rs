//! Liquidity-sweep signal detector.
//!
//! Each side runs a two-state machine. In SEARCHING it waits for a bar that
//! sweeps the last confirmed swing level and closes back across it; that bar's
//! extreme becomes the trap. In HUNTING it waits for a second sweep-and-reclaim
//! of the trap (the double tap) and fires if the filters agree. The state is a
//! plain value handed in and returned, so the detector itself holds no memory
//! between calls.

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Candle, EntrySignal, Side};

use crate::config::{DetectorConfig, FilterFailurePolicy};
use crate::indicators::{
    last_swing_high, last_swing_low, AtrIndicator, EmaIndicator, RsiIndicator, SmaIndicator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Searching,
    Hunting,
}

/// Per-side machine state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SignalState {
    pub mode: Mode,
    /// Extreme of the bar that first swept the swing level.
    pub trap_price: f64,
    /// Close beyond this abandons the zone.
    pub invalidation_price: f64,
    /// Set once an entry fired from the current trap.
    pub attempted: bool,
}

impl SignalState {
    fn reset(self) -> Self {
        Self {
            mode: Mode::Searching,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DetectorState {
    pub long: SignalState,
    pub short: SignalState,
}

impl DetectorState {
    pub fn side(&self, side: Side) -> &SignalState {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SignalState {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }
}

/// Indicator readings for the newest bar of an evaluation window.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    bar: Candle,
    atr: Option<f64>,
    rsi: Option<f64>,
    ema: Option<f64>,
    volume_avg: Option<f64>,
}

pub struct Detector {
    cfg: DetectorConfig,
    atr: AtrIndicator,
    rsi: RsiIndicator,
    ema: EmaIndicator,
    volume: SmaIndicator,
}

impl Detector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            atr: AtrIndicator::new(cfg.atr_period),
            rsi: RsiIndicator::new(cfg.rsi_period),
            ema: EmaIndicator::new(cfg.ema_period),
            volume: SmaIndicator::new(cfg.volume_period),
            cfg,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    /// Advance both machines by the newest bar of `bars`.
    ///
    /// `bars` is oldest-first and its last element is the bar being judged
    /// (usually the partial bar). The long side is stepped first; when it
    /// fires the short side is left untouched for this call.
    pub fn evaluate(
        &self,
        state: DetectorState,
        bars: &[Candle],
    ) -> (DetectorState, Option<EntrySignal>) {
        if bars.len() < self.cfg.min_bars.max(1) {
            return (state, None);
        }
        let snap = self.snapshot(bars);
        let mut next = state;

        for side in [Side::Long, Side::Short] {
            if !self.enabled(side) {
                continue;
            }
            let (side_state, signal) = self.step(side, *state.side(side), &snap, bars);
            *next.side_mut(side) = side_state;
            if signal.is_some() {
                return (next, signal);
            }
        }
        (next, None)
    }

    fn enabled(&self, side: Side) -> bool {
        match side {
            Side::Long => self.cfg.long,
            Side::Short => self.cfg.short,
        }
    }

    fn snapshot(&self, bars: &[Candle]) -> Snapshot {
        let closes: Vec<f64> = bars.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|c| c.volume).collect();
        Snapshot {
            bar: bars[bars.len() - 1],
            atr: self.atr.compute(bars),
            rsi: self.rsi.compute(&closes),
            ema: self.ema.compute(&closes),
            volume_avg: self.volume.compute(&volumes),
        }
    }

    fn swing_level(&self, side: Side, bars: &[Candle]) -> Option<f64> {
        let extremes: Vec<f64> = bars.iter().map(|c| side.adverse_extreme(c)).collect();
        match side {
            Side::Long => last_swing_low(&extremes, self.cfg.swing_period),
            Side::Short => last_swing_high(&extremes, self.cfg.swing_period),
        }
    }

    fn step(
        &self,
        side: Side,
        state: SignalState,
        snap: &Snapshot,
        bars: &[Candle],
    ) -> (SignalState, Option<EntrySignal>) {
        let sign = side.sign();
        let bar = snap.bar;
        let extreme = side.adverse_extreme(&bar);

        match state.mode {
            Mode::Searching => {
                let Some(level) = self.swing_level(side, bars) else {
                    return (state, None);
                };
                if side.pierces(extreme, level) && side.clears(bar.close, level) {
                    let armed = SignalState {
                        mode: Mode::Hunting,
                        trap_price: extreme,
                        invalidation_price: bar.close * (1.0 + sign * self.cfg.invalidation_tolerance),
                        attempted: false,
                    };
                    debug!(
                        %side,
                        swing = level,
                        trap = armed.trap_price,
                        invalidation = armed.invalidation_price,
                        "sweep detected, hunting"
                    );
                    return (armed, None);
                }
                (state, None)
            }
            Mode::Hunting => {
                if side.clears(bar.close, state.invalidation_price) {
                    debug!(%side, close = bar.close, "price escaped zone, searching");
                    return (state.reset(), None);
                }
                let crash_level = state.trap_price * (1.0 - sign * self.cfg.crash_tolerance);
                if side.pierces(bar.close, crash_level) {
                    debug!(%side, close = bar.close, "price crashed through trap, searching");
                    return (state.reset(), None);
                }

                let double_tap = side.pierces(extreme, state.trap_price)
                    && side.clears(bar.close, state.trap_price)
                    && !state.attempted;
                if !double_tap {
                    return (state, None);
                }

                match self.check_filters(side, snap) {
                    Ok(atr) => {
                        let signal = EntrySignal {
                            side,
                            entry_price: bar.close,
                            initial_stop: extreme - sign * self.cfg.stop_atr_multiple * atr,
                            atr,
                            reason: format!("double tap {side} trap {:.2}", state.trap_price),
                            size_multiplier: self.size_multiplier(snap),
                            trail: self.cfg.trail,
                        };
                        debug!(
                            %side,
                            entry = signal.entry_price,
                            stop = signal.initial_stop,
                            atr,
                            "double tap confirmed"
                        );
                        let fired = SignalState {
                            mode: Mode::Searching,
                            attempted: true,
                            ..state
                        };
                        (fired, Some(signal))
                    }
                    Err(filter) => {
                        debug!(%side, filter, policy = ?self.cfg.on_filter_failure, "double tap filtered");
                        match self.cfg.on_filter_failure {
                            FilterFailurePolicy::KeepHunting => (state, None),
                            FilterFailurePolicy::Reset => (state.reset(), None),
                        }
                    }
                }
            }
        }
    }

    /// Returns the ATR to size the stop with, or the name of the first
    /// filter that rejected the bar.
    fn check_filters(&self, side: Side, snap: &Snapshot) -> Result<f64, &'static str> {
        let filters = &self.cfg.filters;
        let close = snap.bar.close;
        let atr = snap.atr.ok_or("atr")?;

        if let Some(floor) = filters.volatility_floor {
            if close <= 0.0 || atr / close < floor {
                return Err("volatility");
            }
        }
        if filters.require_trend_ema {
            let ema = snap.ema.ok_or("trend")?;
            if !side.clears(close, ema) {
                return Err("trend");
            }
        }
        if let Some(threshold) = filters.rsi_threshold {
            let rsi = snap.rsi.ok_or("rsi")?;
            let passes = match side {
                Side::Long => rsi > threshold.long_min,
                Side::Short => rsi < threshold.short_max,
            };
            if !passes {
                return Err("rsi");
            }
        }
        if filters.require_volume_above_average {
            let avg = snap.volume_avg.ok_or("volume")?;
            if snap.bar.volume <= avg {
                return Err("volume");
            }
        }
        Ok(atr)
    }

    fn size_multiplier(&self, snap: &Snapshot) -> f64 {
        match (self.cfg.volume_boost, snap.volume_avg) {
            (Some(boost), Some(avg)) if snap.bar.volume > boost.ratio * avg => boost.size_multiplier,
            _ => 1.0,
        }
    }
}
