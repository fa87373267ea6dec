pub mod atr;
pub mod ema;
pub mod rsi;
pub mod swing;

pub use atr::{true_range, AtrIndicator};
pub use ema::{EmaIndicator, SmaIndicator};
pub use rsi::RsiIndicator;
pub use swing::{last_swing_high, last_swing_low, swing_highs, swing_lows};
