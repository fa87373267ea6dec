use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use common::{Config, PortfolioState, RejectionReason};

/// Account-level limits. Both are off unless configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Loss since the start of the UTC day, as a fraction of that day's
    /// opening equity, that stops new entries until the next day.
    pub daily_loss_limit: Option<f64>,
    /// Drawdown from peak equity that stops new entries for the rest of the run.
    pub max_drawdown_halt: Option<f64>,
}

impl RiskConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            daily_loss_limit: cfg.daily_loss_limit,
            max_drawdown_halt: cfg.max_drawdown_halt,
        }
    }
}

/// The gatekeeper between a signal and the broker.
///
/// Every entry asks [`RiskManager::check_entry`] first. The daily kill switch
/// clears at the next UTC midnight; the drawdown halt latches.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    day: Option<NaiveDate>,
    day_start_equity: f64,
    halted: bool,
}

impl RiskManager {
    pub fn new(config: RiskConfig, initial_equity: f64) -> Self {
        Self {
            config,
            day: None,
            day_start_equity: initial_equity,
            halted: false,
        }
    }

    /// Track the UTC day. The first call on a new day records `equity` as
    /// that day's baseline.
    pub fn on_bar(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        let today = timestamp.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.day_start_equity = equity;
        }
    }

    /// Profit or loss since the start of the current day, as a fraction.
    pub fn daily_pnl_fraction(&self, equity: f64) -> f64 {
        if self.day_start_equity <= 0.0 {
            return 0.0;
        }
        (equity - self.day_start_equity) / self.day_start_equity
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn check_entry(&mut self, portfolio: &PortfolioState) -> Result<(), RejectionReason> {
        if let Some(limit) = self.config.max_drawdown_halt {
            if !self.halted && portfolio.drawdown() >= limit {
                warn!(
                    drawdown_pct = portfolio.drawdown() * 100.0,
                    "Max drawdown breached, halting new entries"
                );
                self.halted = true;
            }
        }
        if self.halted {
            return self.reject(RejectionReason::DrawdownHalt);
        }

        if let Some(limit) = self.config.daily_loss_limit {
            let daily = self.daily_pnl_fraction(portfolio.equity);
            if daily <= -limit {
                return self.reject(RejectionReason::DailyLossLimit);
            }
        }
        Ok(())
    }

    fn reject(&self, reason: RejectionReason) -> Result<(), RejectionReason> {
        warn!(reason = %reason, day_start_equity = self.day_start_equity, "Entry rejected by RiskManager");
        Err(reason)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
