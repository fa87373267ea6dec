pub mod manager;
pub mod sizer;
pub mod trailing;

pub use manager::{RiskConfig, RiskManager};
pub use sizer::{size, PositionSizer};
pub use trailing::{profit_ratio, update_position, update_stop, StopUpdate};
