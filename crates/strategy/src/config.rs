use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Error, Result, Timeframe, TrailConfig};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "turbo_sniper"
/// name = "BTC turbo"
/// pair = "BTCUSDT"
///
/// [strategy.params]
/// risk_fraction = 0.02
/// on_filter_failure = "reset"
/// volatility_floor = 0.004
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Profile identifier: "shadow_sniper", "turbo_sniper" or "revenge".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Human-readable name shown in logs and used for the output directory.
    pub name: String,
    /// Trading pair, e.g. "BTCUSDT".
    pub pair: String,
    /// Overrides applied on top of the profile defaults.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read strategy config at '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: StrategyFileConfig = toml::from_str(content)?;
        if file.strategies.is_empty() {
            return Err(Error::Config("strategy file defines no [[strategy]] entries".into()));
        }
        Ok(file)
    }
}

/// What the detector does when a double tap is seen but the filters reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterFailurePolicy {
    /// Stay in HUNTING and try again on the next evaluation.
    #[default]
    KeepHunting,
    /// Abandon the zone and go back to SEARCHING.
    Reset,
}

impl std::str::FromStr for FilterFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "keep_hunting" | "keep-hunting" | "persist" => Ok(Self::KeepHunting),
            "reset" => Ok(Self::Reset),
            other => Err(Error::Config(format!(
                "on_filter_failure must be 'keep_hunting' or 'reset', got '{other}'"
            ))),
        }
    }
}

/// RSI bounds a double tap must respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiThreshold {
    /// Longs require RSI strictly above this.
    pub long_min: f64,
    /// Shorts require RSI strictly below this.
    pub short_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterConfig {
    /// Close must be on the trade's side of EMA(`ema_period`).
    pub require_trend_ema: bool,
    pub rsi_threshold: Option<RsiThreshold>,
    /// Bar volume must exceed SMA(volume, `volume_period`).
    pub require_volume_above_average: bool,
    /// Minimum ATR / close; quieter markets are skipped.
    pub volatility_floor: Option<f64>,
}

/// Size up when the trigger bar's volume is an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeBoost {
    /// Volume must exceed `ratio` × average volume.
    pub ratio: f64,
    pub size_multiplier: f64,
}

/// Everything the signal detector needs. One struct covers every variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Fewer coarse bars than this and the detector stays silent.
    pub min_bars: usize,
    pub swing_period: usize,
    pub atr_period: usize,
    pub rsi_period: usize,
    pub ema_period: usize,
    pub volume_period: usize,
    /// Abandon the zone once close runs this far past the trigger close.
    pub invalidation_tolerance: f64,
    /// Abandon the zone once close breaks this far through the trap.
    pub crash_tolerance: f64,
    /// Stop distance beyond the trigger bar's extreme, in ATRs.
    pub stop_atr_multiple: f64,
    pub long: bool,
    pub short: bool,
    pub filters: FilterConfig,
    pub on_filter_failure: FilterFailurePolicy,
    pub volume_boost: Option<VolumeBoost>,
    pub trail: TrailConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_bars: 200,
            swing_period: 5,
            atr_period: 14,
            rsi_period: 14,
            ema_period: 200,
            volume_period: 20,
            invalidation_tolerance: 0.05,
            crash_tolerance: 0.05,
            stop_atr_multiple: 1.0,
            long: true,
            short: false,
            filters: FilterConfig::default(),
            on_filter_failure: FilterFailurePolicy::KeepHunting,
            volume_boost: None,
            trail: TrailConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("swing_period", self.swing_period, 1),
            ("atr_period", self.atr_period, 1),
            ("rsi_period", self.rsi_period, 2),
            ("ema_period", self.ema_period, 1),
            ("volume_period", self.volume_period, 1),
        ];
        for (name, value, min) in periods {
            if value < min {
                return Err(Error::Config(format!("{name} must be >= {min}, got {value}")));
            }
        }
        if !self.long && !self.short {
            return Err(Error::Config("at least one of long/short must be enabled".into()));
        }
        for (name, v) in [
            ("invalidation_tolerance", self.invalidation_tolerance),
            ("crash_tolerance", self.crash_tolerance),
        ] {
            if !(0.0..1.0).contains(&v) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {v}")));
            }
        }
        if !(self.stop_atr_multiple >= 0.0) {
            return Err(Error::Config("stop_atr_multiple must be >= 0".into()));
        }
        if !(self.trail.breakeven_trigger_ratio > 0.0) || !(self.trail.atr_multiplier > 0.0) {
            return Err(Error::Config(
                "breakeven_trigger and trailing_multiplier must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A fully resolved strategy: profile defaults with file overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySettings {
    pub name: String,
    pub profile: String,
    pub pair: String,
    pub signal_timeframe: Timeframe,
    /// Signal cadence. The detector runs when the simulation clock is a
    /// multiple of this many minutes.
    pub check_every_minutes: u32,
    /// Closed coarse bars handed to the detector on each evaluation.
    pub history_bars: usize,
    pub risk_fraction: f64,
    pub detector: DetectorConfig,
}

impl StrategySettings {
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        if self.check_every_minutes == 0 {
            return Err(Error::Config("check_every_minutes must be >= 1".into()));
        }
        if self.history_bars < self.detector.min_bars {
            return Err(Error::Config(format!(
                "history_bars ({}) must be >= min_bars ({})",
                self.history_bars, self.detector.min_bars
            )));
        }
        if !(self.risk_fraction > 0.0 && self.risk_fraction < 1.0) {
            return Err(Error::Config(format!(
                "risk_fraction must be in (0, 1), got {}",
                self.risk_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_file() {
        let file = StrategyFileConfig::parse(
            r#"
            [[strategy]]
            type = "turbo_sniper"
            name = "BTC turbo"
            pair = "BTCUSDT"

            [strategy.params]
            risk_fraction = 0.02
            on_filter_failure = "reset"

            [[strategy]]
            type = "shadow_sniper"
            name = "BTC shadow"
            pair = "BTCUSDT"
            "#,
        )
        .unwrap();
        assert_eq!(file.strategies.len(), 2);
        assert_eq!(file.strategies[0].strategy_type, "turbo_sniper");
        assert!(file.strategies[1].params.is_empty());
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(StrategyFileConfig::parse("strategy = []").is_err());
    }

    #[test]
    fn filter_failure_policy_parses() {
        assert_eq!("reset".parse::<FilterFailurePolicy>().unwrap(), FilterFailurePolicy::Reset);
        assert_eq!(
            "keep_hunting".parse::<FilterFailurePolicy>().unwrap(),
            FilterFailurePolicy::KeepHunting
        );
        assert!("maybe".parse::<FilterFailurePolicy>().is_err());
    }

    #[test]
    fn detector_config_validation() {
        assert!(DetectorConfig::default().validate().is_ok());
        let cfg = DetectorConfig {
            long: false,
            short: false,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = DetectorConfig {
            rsi_period: 1,
            ..DetectorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
