use std::path::PathBuf;

use crate::{EndOfDataPolicy, Error, Result};

/// Run-level configuration loaded from environment variables at startup.
///
/// Strategy-level knobs (periods, filters, trailing parameters) live in the
/// strategy TOML file instead; this covers the account and the data.
#[derive(Debug, Clone)]
pub struct Config {
    // Data
    pub data_path: PathBuf,
    pub symbol: String,

    // Account
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    pub max_notional_fraction: f64,

    // Risk gates
    pub daily_loss_limit: Option<f64>,
    pub max_drawdown_halt: Option<f64>,

    // Loop
    pub warmup_bars: usize,
    pub end_of_data: EndOfDataPolicy,

    // Paths
    pub strategy_config_path: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/BTCUSDT-1m.csv"),
            symbol: "BTCUSDT".to_string(),
            initial_capital: 10_000.0,
            commission_rate: 0.001,
            slippage_rate: 0.0005,
            max_notional_fraction: 0.98,
            daily_loss_limit: None,
            max_drawdown_halt: None,
            warmup_bars: 0,
            end_of_data: EndOfDataPolicy::ForceClose,
            strategy_config_path: PathBuf::from("config/strategies.toml"),
            output_dir: PathBuf::from("results"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, reading `.env` if present.
    /// Every variable is optional; malformed values are a configuration error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let defaults = Config::default();
        let cfg = Config {
            data_path: optional_env("DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            symbol: optional_env("SYMBOL").unwrap_or(defaults.symbol),
            initial_capital: parsed_env("INITIAL_CAPITAL")?.unwrap_or(defaults.initial_capital),
            commission_rate: parsed_env("COMMISSION_RATE")?.unwrap_or(defaults.commission_rate),
            slippage_rate: parsed_env("SLIPPAGE_RATE")?.unwrap_or(defaults.slippage_rate),
            max_notional_fraction: parsed_env("MAX_NOTIONAL_FRACTION")?
                .unwrap_or(defaults.max_notional_fraction),
            daily_loss_limit: parsed_env("DAILY_LOSS_LIMIT")?,
            max_drawdown_halt: parsed_env("MAX_DRAWDOWN_HALT")?,
            warmup_bars: parsed_env("WARMUP_BARS")?.unwrap_or(defaults.warmup_bars),
            end_of_data: match optional_env("END_OF_DATA") {
                Some(v) => v
                    .parse()
                    .map_err(|e| Error::Config(format!("END_OF_DATA: {e}")))?,
                None => defaults.end_of_data,
            },
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.strategy_config_path),
            output_dir: optional_env("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the simulation meaningless.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_capital > 0.0) {
            return Err(Error::Config("INITIAL_CAPITAL must be positive".into()));
        }
        for (name, v) in [
            ("COMMISSION_RATE", self.commission_rate),
            ("SLIPPAGE_RATE", self.slippage_rate),
        ] {
            if !(0.0..1.0).contains(&v) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {v}")));
            }
        }
        if !(self.max_notional_fraction > 0.0 && self.max_notional_fraction <= 1.0) {
            return Err(Error::Config("MAX_NOTIONAL_FRACTION must be in (0, 1]".into()));
        }
        for (name, v) in [
            ("DAILY_LOSS_LIMIT", self.daily_loss_limit),
            ("MAX_DRAWDOWN_HALT", self.max_drawdown_halt),
        ] {
            if let Some(v) = v {
                if !(v > 0.0 && v < 1.0) {
                    return Err(Error::Config(format!("{name} must be in (0, 1), got {v}")));
                }
            }
        }
        Ok(())
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{key}='{v}': {e}")))
        })
        .transpose()
}
