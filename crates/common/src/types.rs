use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar. `timestamp` is the bar-open instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// True when every price and the volume are finite numbers.
    pub fn is_complete(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Direction of a position or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Direction multiplier: +1 for longs, -1 for shorts.
    ///
    /// Every long/short rule in the workspace is written once against this
    /// sign instead of being duplicated per side.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// The bar extreme that moves against this side (low for longs).
    pub fn adverse_extreme(self, candle: &Candle) -> f64 {
        match self {
            Side::Long => candle.low,
            Side::Short => candle.high,
        }
    }

    /// The bar extreme that moves in favour of this side (high for longs).
    pub fn favorable_extreme(self, candle: &Candle) -> f64 {
        match self {
            Side::Long => candle.high,
            Side::Short => candle.low,
        }
    }

    /// `price` is strictly beyond `level` in the adverse direction
    /// (below for longs, above for shorts).
    pub fn pierces(self, price: f64, level: f64) -> bool {
        self.sign() * (level - price) > 0.0
    }

    /// `price` is strictly beyond `level` in the favourable direction
    /// (above for longs, below for shorts).
    pub fn clears(self, price: f64, level: f64) -> bool {
        self.sign() * (price - level) > 0.0
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Per-position trailing-stop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailConfig {
    /// Profit, in R, at which the stop jumps to the entry price.
    pub breakeven_trigger_ratio: f64,
    /// ATR multiple subtracted from (added to) the best price since entry.
    pub atr_multiplier: f64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            breakeven_trigger_ratio: 1.5,
            atr_multiplier: 3.0,
        }
    }
}

/// An entry produced by the signal detector. Consumed immediately by sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub side: Side,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub atr: f64,
    pub reason: String,
    /// Scales the risk budget for this entry (1.0 = normal).
    pub size_multiplier: f64,
    pub trail: TrailConfig,
}

/// Stop management phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopPhase {
    #[default]
    Dormant,
    Breakeven,
    Trailing,
}

impl std::fmt::Display for StopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopPhase::Dormant => write!(f, "dormant"),
            StopPhase::Breakeven => write!(f, "breakeven"),
            StopPhase::Trailing => write!(f, "trailing"),
        }
    }
}

/// An open simulated position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    /// Fill price, slippage included.
    pub entry_price: f64,
    pub quantity: f64,
    pub initial_stop: f64,
    pub current_stop: f64,
    pub atr_at_entry: f64,
    pub highest_price_since_entry: f64,
    pub lowest_price_since_entry: f64,
    pub is_breakeven: bool,
    pub phase: StopPhase,
    pub trail: TrailConfig,
    pub entry_fee: f64,
    pub entry_reason: String,
}

impl Position {
    /// Distance between entry and initial stop. One R, in price units.
    pub fn risk_distance(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }

    /// Best price seen since entry in the position's favour.
    pub fn best_price(&self) -> f64 {
        match self.side {
            Side::Long => self.highest_price_since_entry,
            Side::Short => self.lowest_price_since_entry,
        }
    }

    /// Fold a bar's range into the since-entry extremes.
    pub fn track_extremes(&mut self, candle: &Candle) {
        self.highest_price_since_entry = self.highest_price_since_entry.max(candle.high);
        self.lowest_price_since_entry = self.lowest_price_since_entry.min(candle.low);
    }

    /// Whether `candle` touched the current stop.
    pub fn stop_breached(&self, candle: &Candle) -> bool {
        match self.side {
            Side::Long => candle.low <= self.current_stop,
            Side::Short => candle.high >= self.current_stop,
        }
    }

    /// Value of the position at `price`: posted notional plus unrealized PnL.
    pub fn marked_value(&self, price: f64) -> f64 {
        self.entry_price * self.quantity
            + self.side.sign() * (price - self.entry_price) * self.quantity
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Initial stop hit before breakeven.
    StopLoss,
    /// Stop hit while parked at the entry price.
    BreakevenStop,
    /// Chandelier stop hit.
    TrailingStop,
    /// Closed by the end-of-data policy.
    EndOfData,
}

impl ExitReason {
    /// Stop exit reason matching the phase the position was in.
    pub fn for_stop(phase: StopPhase) -> Self {
        match phase {
            StopPhase::Dormant => ExitReason::StopLoss,
            StopPhase::Breakeven => ExitReason::BreakevenStop,
            StopPhase::Trailing => ExitReason::TrailingStop,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::BreakevenStop => write!(f, "BREAKEVEN_STOP"),
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
            ExitReason::EndOfData => write!(f, "END_OF_DATA"),
        }
    }
}

/// A completed round trip. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Realized PnL net of commission and slippage.
    pub pnl: f64,
    /// `pnl` divided by the initial risk in currency.
    pub pnl_r: f64,
    pub exit_reason: ExitReason,
    pub entry_reason: String,
    /// Closed at the last price because the data ran out.
    pub forced: bool,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Account-level figures, updated after every close and every mark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub equity: f64,
    pub peak_equity: f64,
    /// Largest peak-to-trough decline seen so far, as a fraction of the peak.
    pub max_drawdown: f64,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            equity: initial_capital,
            peak_equity: initial_capital,
            max_drawdown: 0.0,
        }
    }

    /// Record a new equity figure and ratchet peak and drawdown.
    pub fn record_equity(&mut self, equity: f64) {
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - equity) / self.peak_equity;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    /// Current decline from peak as a fraction of the peak.
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
    }
}

/// Reason an entry was refused by the risk manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    DailyLossLimit,
    DrawdownHalt,
    PositionAlreadyOpen,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::DailyLossLimit => write!(f, "daily loss limit reached"),
            RejectionReason::DrawdownHalt => write!(f, "max drawdown halt active"),
            RejectionReason::PositionAlreadyOpen => write!(f, "position already open"),
        }
    }
}

/// What happens to a position still open when the candle stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndOfDataPolicy {
    /// Close at the last close, flag the trade as forced, include it in stats.
    #[default]
    ForceClose,
    /// Leave it open and report it separately; stats cover closed trades only.
    Exclude,
}

impl std::str::FromStr for EndOfDataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "close" | "force_close" | "force-close" => Ok(EndOfDataPolicy::ForceClose),
            "exclude" | "leave_open" | "leave-open" => Ok(EndOfDataPolicy::Exclude),
            other => Err(format!("expected 'close' or 'exclude', got '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(low: f64, high: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            open: (low + high) / 2.0,
            high,
            low,
            close: (low + high) / 2.0,
            volume: 1.0,
        }
    }

    #[test]
    fn side_helpers_mirror_each_other() {
        let c = candle(90.0, 110.0);
        assert_eq!(Side::Long.adverse_extreme(&c), 90.0);
        assert_eq!(Side::Short.adverse_extreme(&c), 110.0);
        assert!(Side::Long.pierces(89.0, 90.0));
        assert!(!Side::Long.pierces(90.0, 90.0));
        assert!(Side::Short.pierces(111.0, 110.0));
        assert!(Side::Long.clears(101.0, 100.0));
        assert!(Side::Short.clears(99.0, 100.0));
    }

    fn position(side: Side, stop: f64) -> Position {
        Position {
            symbol: "BTCUSDT".into(),
            side,
            entry_time: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            entry_price: 100.0,
            quantity: 1.0,
            initial_stop: stop,
            current_stop: stop,
            atr_at_entry: 5.0,
            highest_price_since_entry: 100.0,
            lowest_price_since_entry: 100.0,
            is_breakeven: false,
            phase: StopPhase::Dormant,
            trail: TrailConfig::default(),
            entry_fee: 0.0,
            entry_reason: "test".into(),
        }
    }

    #[test]
    fn long_stop_breached_by_low_touching_it() {
        let pos = position(Side::Long, 90.0);
        assert!(pos.stop_breached(&candle(90.0, 110.0)));
        assert!(pos.stop_breached(&candle(85.0, 110.0)));
        assert!(!pos.stop_breached(&candle(90.5, 110.0)));
    }

    #[test]
    fn short_stop_breached_by_high_touching_it() {
        let pos = position(Side::Short, 110.0);
        assert!(pos.stop_breached(&candle(90.0, 110.0)));
        assert!(pos.stop_breached(&candle(90.0, 115.0)));
        assert!(!pos.stop_breached(&candle(90.0, 109.5)));
        // A low far below never stops a short out.
        assert!(!pos.stop_breached(&candle(10.0, 100.0)));
    }

    #[test]
    fn portfolio_drawdown_is_monotone() {
        let mut p = PortfolioState::new(10_000.0);
        p.record_equity(12_000.0);
        p.record_equity(9_000.0);
        assert!((p.max_drawdown - 0.25).abs() < 1e-12);
        p.record_equity(11_000.0);
        assert!((p.max_drawdown - 0.25).abs() < 1e-12);
        assert_eq!(p.peak_equity, 12_000.0);
    }

    #[test]
    fn exit_reason_follows_phase() {
        assert_eq!(ExitReason::for_stop(StopPhase::Dormant), ExitReason::StopLoss);
        assert_eq!(ExitReason::for_stop(StopPhase::Trailing).to_string(), "TRAILING_STOP");
    }

    #[test]
    fn end_of_data_policy_parses() {
        assert_eq!("close".parse::<EndOfDataPolicy>().unwrap(), EndOfDataPolicy::ForceClose);
        assert_eq!("Exclude".parse::<EndOfDataPolicy>().unwrap(), EndOfDataPolicy::Exclude);
        assert!("keep".parse::<EndOfDataPolicy>().is_err());
    }
}
