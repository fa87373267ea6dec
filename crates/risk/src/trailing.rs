//! Three-phase stop management: dormant, breakeven, trailing.
//!
//! While dormant the stop sits at the initial level. Once profit reaches
//! `breakeven_trigger_ratio` R the stop jumps to the entry price, and from
//! then on it follows the best price since entry at `atr_multiplier` ATRs.
//! The stop only ever tightens and the phase only ever moves forward.

use common::{Position, StopPhase};

/// What one update decided. Computed without touching the position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopUpdate {
    Hold,
    Breakeven { stop: f64 },
    Trail { stop: f64 },
}

/// Unrealized profit at `price`, in multiples of the initial risk.
pub fn profit_ratio(position: &Position, price: f64) -> f64 {
    let risk = position.risk_distance();
    if !(risk > 0.0) {
        return 0.0;
    }
    position.side.sign() * (price - position.entry_price) / risk
}

/// Decide the next stop for `position` at `price`.
pub fn update_stop(position: &Position, price: f64, atr: f64) -> StopUpdate {
    let side = position.side;
    match position.phase {
        StopPhase::Dormant => {
            if profit_ratio(position, price) >= position.trail.breakeven_trigger_ratio
                && side.clears(position.entry_price, position.current_stop)
            {
                StopUpdate::Breakeven {
                    stop: position.entry_price,
                }
            } else {
                StopUpdate::Hold
            }
        }
        StopPhase::Breakeven | StopPhase::Trailing => {
            let candidate = position.best_price() - side.sign() * atr * position.trail.atr_multiplier;
            // The stop never loosens.
            if candidate.is_finite() && side.clears(candidate, position.current_stop) {
                StopUpdate::Trail { stop: candidate }
            } else {
                StopUpdate::Hold
            }
        }
    }
}

/// Apply a decision from [`update_stop`].
pub fn apply(position: &mut Position, update: StopUpdate) {
    match update {
        StopUpdate::Hold => {}
        StopUpdate::Breakeven { stop } => {
            position.current_stop = stop;
            position.is_breakeven = true;
            position.phase = StopPhase::Breakeven;
        }
        StopUpdate::Trail { stop } => {
            position.current_stop = stop;
            position.phase = StopPhase::Trailing;
        }
    }
}

pub fn update_position(position: &mut Position, price: f64, atr: f64) -> StopUpdate {
    let update = update_stop(position, price, atr);
    apply(position, update);
    update
}
