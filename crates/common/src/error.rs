use thiserror::Error;

use crate::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing candle data, non-monotonic or duplicate timestamps.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Degenerate risk: entry {entry} vs stop {stop} gives no risk distance")]
    DegenerateRisk { entry: f64, stop: f64 },

    #[error("Insufficient capital: required {required:.2}, available {available:.2}")]
    InsufficientCapital { required: f64, available: f64 },

    /// The one-position-per-symbol bookkeeping was broken. Always a logic bug.
    #[error("State invariant violated: {0}")]
    StateInvariant(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: RejectionReason },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that cost the current signal but must not stop the simulation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DegenerateRisk { .. }
                | Error::InsufficientCapital { .. }
                | Error::OrderRejected { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
