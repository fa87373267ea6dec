use std::collections::HashMap;

use tracing::{info, warn};

use common::{Candle, EntrySignal, Error, Result, Timeframe, TrailConfig};

use crate::config::{
    DetectorConfig, FilterConfig, FilterFailurePolicy, RsiThreshold, StrategyConfig,
    StrategyFileConfig, StrategySettings, VolumeBoost,
};
use crate::detector::{Detector, DetectorState};
use crate::Strategy;

/// Every key a `[strategy.params]` table may carry.
const KNOWN_PARAMS: &[&str] = &[
    "signal_timeframe",
    "check_every_minutes",
    "history_bars",
    "min_bars",
    "risk_fraction",
    "swing_period",
    "atr_period",
    "rsi_period",
    "ema_period",
    "volume_period",
    "invalidation_tolerance",
    "crash_tolerance",
    "stop_atr_multiple",
    "long",
    "short",
    "require_trend_ema",
    "require_rsi",
    "rsi_long_min",
    "rsi_short_max",
    "require_volume_above_average",
    "volatility_floor",
    "volume_boost",
    "volume_boost_ratio",
    "volume_boost_multiplier",
    "on_filter_failure",
    "breakeven_trigger",
    "trailing_multiplier",
];

/// Holds every configured strategy instance.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Build the registry from config. Unknown profiles and bad params are
    /// configuration errors.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Result<Self> {
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();

        for cfg in &file_cfg.strategies {
            let settings = build_settings(cfg)?;
            info!(
                name = %settings.name,
                profile = %settings.profile,
                pair = %settings.pair,
                timeframe = %settings.signal_timeframe,
                "Registered strategy"
            );
            strategies.push(Box::new(SweepStrategy::new(settings)));
        }

        Ok(Self { strategies })
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Strategy> {
        self.strategies.iter().map(|s| s.as_ref())
    }

    pub fn into_strategies(self) -> Vec<Box<dyn Strategy>> {
        self.strategies
    }
}

/// The liquidity-sweep detector wrapped as a [`Strategy`].
pub struct SweepStrategy {
    settings: StrategySettings,
    detector: Detector,
}

impl SweepStrategy {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            detector: Detector::new(settings.detector.clone()),
            settings,
        }
    }
}

impl Strategy for SweepStrategy {
    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn evaluate(
        &self,
        state: DetectorState,
        bars: &[Candle],
    ) -> (DetectorState, Option<EntrySignal>) {
        self.detector.evaluate(state, bars)
    }
}

// ─── Profiles ─────────────────────────────────────────────────────────────────

/// Resolve a strategy entry: profile defaults first, then `params` overrides.
pub fn build_settings(cfg: &StrategyConfig) -> Result<StrategySettings> {
    let mut settings = profile(&cfg.strategy_type)?;
    settings.name = cfg.name.clone();
    settings.pair = cfg.pair.clone();

    for key in cfg.params.keys() {
        if !KNOWN_PARAMS.contains(&key.as_str()) {
            warn!(strategy = %cfg.name, param = %key, "Ignoring unknown strategy param");
        }
    }
    apply_params(&mut settings, &cfg.params)?;
    settings.validate()?;
    Ok(settings)
}

/// Built-in defaults for a profile name.
pub fn profile(name: &str) -> Result<StrategySettings> {
    let settings = match name {
        // H1 sweep, long only, every filter on.
        "shadow_sniper" => StrategySettings {
            name: String::new(),
            profile: name.to_string(),
            pair: String::new(),
            signal_timeframe: Timeframe::H1,
            check_every_minutes: 15,
            history_bars: 1000,
            risk_fraction: 0.01,
            detector: DetectorConfig {
                min_bars: 200,
                invalidation_tolerance: 0.05,
                crash_tolerance: 0.05,
                stop_atr_multiple: 1.0,
                filters: FilterConfig {
                    require_trend_ema: true,
                    rsi_threshold: Some(RsiThreshold {
                        long_min: 50.0,
                        short_max: 50.0,
                    }),
                    require_volume_above_average: true,
                    volatility_floor: None,
                },
                on_filter_failure: FilterFailurePolicy::KeepHunting,
                trail: TrailConfig {
                    breakeven_trigger_ratio: 1.5,
                    atr_multiplier: 3.0,
                },
                ..DetectorConfig::default()
            },
        },
        // M15, both sides, tighter zones, sizes up on volume spikes.
        "turbo_sniper" => StrategySettings {
            name: String::new(),
            profile: name.to_string(),
            pair: String::new(),
            signal_timeframe: Timeframe::M15,
            check_every_minutes: 15,
            history_bars: 1000,
            risk_fraction: 0.02,
            detector: DetectorConfig {
                min_bars: 500,
                invalidation_tolerance: 0.03,
                crash_tolerance: 0.02,
                stop_atr_multiple: 1.0,
                long: true,
                short: true,
                filters: FilterConfig {
                    require_trend_ema: true,
                    rsi_threshold: Some(RsiThreshold {
                        long_min: 40.0,
                        short_max: 60.0,
                    }),
                    require_volume_above_average: false,
                    volatility_floor: Some(0.005),
                },
                on_filter_failure: FilterFailurePolicy::KeepHunting,
                volume_boost: Some(VolumeBoost {
                    ratio: 2.0,
                    size_multiplier: 2.0,
                }),
                trail: TrailConfig {
                    breakeven_trigger_ratio: 1.5,
                    atr_multiplier: 2.5,
                },
                ..DetectorConfig::default()
            },
        },
        // H1, tight stop, drops the zone as soon as the filters disagree.
        "revenge" => StrategySettings {
            name: String::new(),
            profile: name.to_string(),
            pair: String::new(),
            signal_timeframe: Timeframe::H1,
            check_every_minutes: 15,
            history_bars: 1000,
            risk_fraction: 0.01,
            detector: DetectorConfig {
                min_bars: 200,
                stop_atr_multiple: 0.5,
                filters: FilterConfig {
                    require_trend_ema: false,
                    rsi_threshold: Some(RsiThreshold {
                        long_min: 50.0,
                        short_max: 50.0,
                    }),
                    require_volume_above_average: true,
                    volatility_floor: None,
                },
                on_filter_failure: FilterFailurePolicy::Reset,
                trail: TrailConfig {
                    breakeven_trigger_ratio: 1.0,
                    atr_multiplier: 2.5,
                },
                ..DetectorConfig::default()
            },
        },
        other => {
            return Err(Error::Config(format!("unknown strategy type '{other}'")));
        }
    };
    Ok(settings)
}

fn apply_params(s: &mut StrategySettings, p: &HashMap<String, toml::Value>) -> Result<()> {
    if let Some(tf) = param_str(p, "signal_timeframe")? {
        s.signal_timeframe = tf.parse()?;
    }
    if let Some(v) = param_usize(p, "check_every_minutes")? {
        s.check_every_minutes = u32::try_from(v)
            .map_err(|_| Error::Config(format!("check_every_minutes out of range: {v}")))?;
    }
    set(&mut s.history_bars, param_usize(p, "history_bars")?);
    set(&mut s.risk_fraction, param_f64(p, "risk_fraction")?);

    let d = &mut s.detector;
    set(&mut d.min_bars, param_usize(p, "min_bars")?);
    set(&mut d.swing_period, param_usize(p, "swing_period")?);
    set(&mut d.atr_period, param_usize(p, "atr_period")?);
    set(&mut d.rsi_period, param_usize(p, "rsi_period")?);
    set(&mut d.ema_period, param_usize(p, "ema_period")?);
    set(&mut d.volume_period, param_usize(p, "volume_period")?);
    set(&mut d.invalidation_tolerance, param_f64(p, "invalidation_tolerance")?);
    set(&mut d.crash_tolerance, param_f64(p, "crash_tolerance")?);
    set(&mut d.stop_atr_multiple, param_f64(p, "stop_atr_multiple")?);
    set(&mut d.long, param_bool(p, "long")?);
    set(&mut d.short, param_bool(p, "short")?);
    set(&mut d.trail.breakeven_trigger_ratio, param_f64(p, "breakeven_trigger")?);
    set(&mut d.trail.atr_multiplier, param_f64(p, "trailing_multiplier")?);
    if let Some(policy) = param_str(p, "on_filter_failure")? {
        d.on_filter_failure = policy.parse()?;
    }

    let f = &mut d.filters;
    set(&mut f.require_trend_ema, param_bool(p, "require_trend_ema")?);
    set(
        &mut f.require_volume_above_average,
        param_bool(p, "require_volume_above_average")?,
    );
    if let Some(floor) = param_f64(p, "volatility_floor")? {
        f.volatility_floor = (floor > 0.0).then_some(floor);
    }
    let long_min = param_f64(p, "rsi_long_min")?;
    let short_max = param_f64(p, "rsi_short_max")?;
    if long_min.is_some() || short_max.is_some() {
        let t = f.rsi_threshold.get_or_insert(RsiThreshold {
            long_min: 50.0,
            short_max: 50.0,
        });
        set(&mut t.long_min, long_min);
        set(&mut t.short_max, short_max);
    }
    if param_bool(p, "require_rsi")? == Some(false) {
        f.rsi_threshold = None;
    }

    let ratio = param_f64(p, "volume_boost_ratio")?;
    let multiplier = param_f64(p, "volume_boost_multiplier")?;
    if ratio.is_some() || multiplier.is_some() {
        let b = d.volume_boost.get_or_insert(VolumeBoost {
            ratio: 2.0,
            size_multiplier: 2.0,
        });
        set(&mut b.ratio, ratio);
        set(&mut b.size_multiplier, multiplier);
    }
    if param_bool(p, "volume_boost")? == Some(false) {
        d.volume_boost = None;
    }
    Ok(())
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn type_error(key: &str, expected: &str, got: &toml::Value) -> Error {
    Error::Config(format!("param '{key}' must be {expected}, got {got}"))
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str) -> Result<Option<f64>> {
    params
        .get(key)
        .map(|v| {
            v.as_float()
                .or_else(|| v.as_integer().map(|i| i as f64))
                .ok_or_else(|| type_error(key, "a number", v))
        })
        .transpose()
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str) -> Result<Option<usize>> {
    params
        .get(key)
        .map(|v| {
            v.as_integer()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| type_error(key, "a non-negative integer", v))
        })
        .transpose()
}

fn param_bool(params: &HashMap<String, toml::Value>, key: &str) -> Result<Option<bool>> {
    params
        .get(key)
        .map(|v| v.as_bool().ok_or_else(|| type_error(key, "a boolean", v)))
        .transpose()
}

fn param_str<'a>(params: &'a HashMap<String, toml::Value>, key: &str) -> Result<Option<&'a str>> {
    params
        .get(key)
        .map(|v| v.as_str().ok_or_else(|| type_error(key, "a string", v)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, params: &str) -> StrategyConfig {
        let params: HashMap<String, toml::Value> = toml::from_str(params).unwrap();
        StrategyConfig {
            strategy_type: kind.into(),
            name: format!("{kind} test"),
            pair: "BTCUSDT".into(),
            params,
        }
    }

    #[test]
    fn every_profile_is_valid() {
        for name in ["shadow_sniper", "turbo_sniper", "revenge"] {
            let s = build_settings(&entry(name, "")).unwrap();
            assert_eq!(s.profile, name);
            assert_eq!(s.pair, "BTCUSDT");
        }
    }

    #[test]
    fn profiles_carry_their_constants() {
        let shadow = profile("shadow_sniper").unwrap();
        assert_eq!(shadow.signal_timeframe, Timeframe::H1);
        assert!(!shadow.detector.short);
        assert_eq!(shadow.detector.trail.atr_multiplier, 3.0);

        let turbo = profile("turbo_sniper").unwrap();
        assert_eq!(turbo.signal_timeframe, Timeframe::M15);
        assert!(turbo.detector.long && turbo.detector.short);
        assert_eq!(turbo.detector.crash_tolerance, 0.02);
        assert_eq!(turbo.detector.filters.volatility_floor, Some(0.005));
        assert!(turbo.detector.volume_boost.is_some());

        let revenge = profile("revenge").unwrap();
        assert_eq!(revenge.detector.stop_atr_multiple, 0.5);
        assert_eq!(revenge.detector.on_filter_failure, FilterFailurePolicy::Reset);
        assert_eq!(revenge.detector.trail.breakeven_trigger_ratio, 1.0);
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let err = build_settings(&entry("martingale", "")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn params_override_profile() {
        let s = build_settings(&entry(
            "shadow_sniper",
            r#"
            risk_fraction = 0.02
            signal_timeframe = "4h"
            swing_period = 3
            on_filter_failure = "reset"
            short = true
            rsi_long_min = 55
            volatility_floor = 0.01
            breakeven_trigger = 2
            require_volume_above_average = false
            "#,
        ))
        .unwrap();
        assert_eq!(s.risk_fraction, 0.02);
        assert_eq!(s.signal_timeframe.minutes(), 240);
        assert_eq!(s.detector.swing_period, 3);
        assert_eq!(s.detector.on_filter_failure, FilterFailurePolicy::Reset);
        assert!(s.detector.short);
        assert_eq!(s.detector.filters.rsi_threshold.unwrap().long_min, 55.0);
        assert_eq!(s.detector.filters.volatility_floor, Some(0.01));
        assert_eq!(s.detector.trail.breakeven_trigger_ratio, 2.0);
        assert!(!s.detector.filters.require_volume_above_average);
    }

    #[test]
    fn filters_can_be_switched_off() {
        let s = build_settings(&entry(
            "turbo_sniper",
            "require_rsi = false\nvolume_boost = false\nvolatility_floor = 0",
        ))
        .unwrap();
        assert!(s.detector.filters.rsi_threshold.is_none());
        assert!(s.detector.volume_boost.is_none());
        assert!(s.detector.filters.volatility_floor.is_none());
    }

    #[test]
    fn wrong_param_type_is_rejected() {
        let err = build_settings(&entry("revenge", "swing_period = \"five\"")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(build_settings(&entry("revenge", "risk_fraction = 1.5")).is_err());
    }

    #[test]
    fn registry_builds_all_entries() {
        let file = StrategyFileConfig::parse(
            r#"
            [[strategy]]
            type = "turbo_sniper"
            name = "a"
            pair = "BTCUSDT"

            [[strategy]]
            type = "revenge"
            name = "b"
            pair = "ETHUSDT"
            "#,
        )
        .unwrap();
        let registry = StrategyRegistry::from_config(&file).unwrap();
        assert_eq!(registry.len(), 2);
        let names: Vec<&str> = registry.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
