pub mod config;
pub mod detector;
pub mod indicators;
pub mod registry;

pub use config::{
    DetectorConfig, FilterConfig, FilterFailurePolicy, RsiThreshold, StrategyConfig,
    StrategyFileConfig, StrategySettings, VolumeBoost,
};
pub use detector::{Detector, DetectorState, Mode, SignalState};
pub use registry::{build_settings, profile, StrategyRegistry, SweepStrategy};

use common::{Candle, EntrySignal};

/// All strategy implementations must satisfy this trait.
pub trait Strategy: Send + Sync {
    /// Resolved settings: cadence, timeframe, risk budget and detector knobs.
    fn settings(&self) -> &StrategySettings;

    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str {
        &self.settings().name
    }

    /// The trading pair this strategy watches (e.g. "BTCUSDT").
    fn pair(&self) -> &str {
        &self.settings().pair
    }

    /// Judge the newest bar of `bars` (closed history plus the partial bar).
    ///
    /// `bars` must contain nothing that would not have been observable at the
    /// simulation cursor. Returns the next state and, at most, one entry.
    fn evaluate(
        &self,
        state: DetectorState,
        bars: &[Candle],
    ) -> (DetectorState, Option<EntrySignal>);
}
