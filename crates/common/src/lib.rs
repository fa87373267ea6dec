pub mod bars;
pub mod config;
pub mod error;
pub mod types;

pub use bars::{aggregate, closed_bars_before, partial_bar, BarSeries, Timeframe};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
