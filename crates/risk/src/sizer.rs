//! Fixed-fractional position sizing.

use common::{EntrySignal, Error, Result};

/// Quantity that loses exactly `equity × risk_fraction` if the stop is hit.
pub fn size(equity: f64, entry: f64, stop: f64, risk_fraction: f64) -> Result<f64> {
    let distance = (entry - stop).abs();
    if !(distance > 0.0) || !distance.is_finite() {
        return Err(Error::DegenerateRisk { entry, stop });
    }
    Ok(equity * risk_fraction / distance)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub risk_fraction: f64,
    /// Notional never exceeds this share of equity, whatever the stop distance.
    pub max_notional_fraction: f64,
}

impl PositionSizer {
    pub fn new(risk_fraction: f64, max_notional_fraction: f64) -> Self {
        Self {
            risk_fraction,
            max_notional_fraction,
        }
    }

    /// Quantity for `signal` given current equity, after the signal's size
    /// multiplier and the notional cap.
    ///
    /// A stop on the wrong side of entry (above a long, below a short) is
    /// `DegenerateRisk`, the same as a stop at entry.
    pub fn quantity(&self, equity: f64, signal: &EntrySignal) -> Result<f64> {
        if !(signal.entry_price > 0.0) || !signal.side.pierces(signal.initial_stop, signal.entry_price) {
            return Err(Error::DegenerateRisk {
                entry: signal.entry_price,
                stop: signal.initial_stop,
            });
        }
        let risk = self.risk_fraction * signal.size_multiplier;
        let by_risk = size(equity, signal.entry_price, signal.initial_stop, risk)?;
        let cap = equity * self.max_notional_fraction / signal.entry_price;
        let quantity = by_risk.min(cap);
        if !(quantity > 0.0) || !quantity.is_finite() {
            return Err(Error::InsufficientCapital {
                required: signal.entry_price * by_risk.abs(),
                available: equity,
            });
        }
        Ok(quantity)
    }
}
