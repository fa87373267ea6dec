use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use common::{
    ClosedTrade, EntrySignal, Error, ExitReason, PortfolioState, Position, Result, StopPhase,
};

/// Simulated broker for backtesting.
///
/// Fills are taken at the requested price with proportional slippage against
/// the trader and a proportional commission on each side. Shorts post their
/// notional as collateral, so cash always falls by the entry cost.
#[derive(Debug, Clone)]
pub struct PaperBroker {
    commission_rate: f64,
    slippage_rate: f64,
    /// Open positions keyed by symbol. Ordered so iteration is reproducible.
    positions: BTreeMap<String, Position>,
    /// Latest known price per symbol, updated via `update_price`.
    prices: BTreeMap<String, f64>,
    trades: Vec<ClosedTrade>,
    portfolio: PortfolioState,
}

impl PaperBroker {
    pub fn new(initial_capital: f64, commission_rate: f64, slippage_rate: f64) -> Self {
        info!(
            capital = initial_capital,
            commission_rate, slippage_rate, "PaperBroker initialized"
        );
        Self {
            commission_rate,
            slippage_rate,
            positions: BTreeMap::new(),
            prices: BTreeMap::new(),
            trades: Vec::new(),
            portfolio: PortfolioState::new(initial_capital),
        }
    }

    pub fn update_price(&mut self, symbol: &str, price: f64) {
        self.prices.insert(symbol.to_string(), price);
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    pub fn cash(&self) -> f64 {
        self.portfolio.cash
    }

    /// Open a position from `signal`. Fails if one is already open for
    /// `symbol` or if the entry cost exceeds available cash.
    pub fn open(
        &mut self,
        symbol: &str,
        time: DateTime<Utc>,
        signal: &EntrySignal,
        quantity: f64,
    ) -> Result<&Position> {
        if self.positions.contains_key(symbol) {
            return Err(Error::StateInvariant(format!(
                "open requested for {symbol} while a position is already open"
            )));
        }
        let side = signal.side;
        let fill = signal.entry_price * (1.0 + side.sign() * self.slippage_rate);
        let notional = fill * quantity;
        let fee = notional * self.commission_rate;
        let cost = notional + fee;
        if cost > self.portfolio.cash {
            return Err(Error::InsufficientCapital {
                required: cost,
                available: self.portfolio.cash,
            });
        }

        self.portfolio.cash -= cost;
        debug!(
            %symbol,
            %side,
            requested = signal.entry_price,
            fill,
            quantity,
            fee,
            stop = signal.initial_stop,
            "Paper entry filled"
        );

        let position = Position {
            symbol: symbol.to_string(),
            side,
            entry_time: time,
            entry_price: fill,
            quantity,
            initial_stop: signal.initial_stop,
            current_stop: signal.initial_stop,
            atr_at_entry: signal.atr,
            highest_price_since_entry: fill,
            lowest_price_since_entry: fill,
            is_breakeven: false,
            phase: StopPhase::Dormant,
            trail: signal.trail,
            entry_fee: fee,
            entry_reason: signal.reason.clone(),
        };
        self.prices.insert(symbol.to_string(), signal.entry_price);
        Ok(self.positions.entry(symbol.to_string()).or_insert(position))
    }

    /// Close the position on `symbol` at `price` (before slippage).
    pub fn close(
        &mut self,
        symbol: &str,
        time: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
        forced: bool,
    ) -> Result<ClosedTrade> {
        let position = self.positions.remove(symbol).ok_or_else(|| {
            Error::StateInvariant(format!("close requested for {symbol} with no open position"))
        })?;
        let sign = position.side.sign();
        let exit = price * (1.0 - sign * self.slippage_rate);
        let exit_fee = exit * position.quantity * self.commission_rate;
        let gross = sign * (exit - position.entry_price) * position.quantity;

        self.portfolio.cash += position.entry_price * position.quantity + gross - exit_fee;

        let pnl = gross - position.entry_fee - exit_fee;
        let risk = position.risk_distance() * position.quantity;
        let pnl_r = if risk > 0.0 { pnl / risk } else { 0.0 };

        let trade = ClosedTrade {
            symbol: position.symbol,
            side: position.side,
            entry_time: position.entry_time,
            exit_time: time,
            entry_price: position.entry_price,
            exit_price: exit,
            quantity: position.quantity,
            pnl,
            pnl_r,
            exit_reason: reason,
            entry_reason: position.entry_reason,
            forced,
        };
        debug!(
            symbol = %trade.symbol,
            side = %trade.side,
            exit,
            pnl,
            pnl_r,
            reason = %reason,
            "Paper exit filled"
        );
        self.prices.insert(symbol.to_string(), price);
        self.trades.push(trade.clone());
        Ok(trade)
    }

    /// Revalue open positions at the latest prices and record equity.
    pub fn mark_to_market(&mut self) -> f64 {
        let open_value: f64 = self
            .positions
            .values()
            .map(|p| {
                let price = self.prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.marked_value(price)
            })
            .sum();
        let equity = self.portfolio.cash + open_value;
        self.portfolio.record_equity(equity);
        equity
    }
}
