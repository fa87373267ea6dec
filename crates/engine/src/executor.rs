use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{ClosedTrade, EntrySignal, Error, ExitReason, Position, RejectionReason, Result};
use paper::PaperBroker;
use risk::{PositionSizer, RiskManager};

/// Turns signals into broker fills for one symbol.
///
/// This is the ONLY component that opens or closes positions on the broker:
/// every entry goes through the risk gate and the sizer first.
pub struct OrderExecutor {
    symbol: String,
    sizer: PositionSizer,
    risk: RiskManager,
    broker: PaperBroker,
    rejected: usize,
}

impl OrderExecutor {
    pub fn new(
        symbol: impl Into<String>,
        sizer: PositionSizer,
        risk: RiskManager,
        broker: PaperBroker,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            sizer,
            risk,
            broker,
            rejected: 0,
        }
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }

    pub fn into_broker(self) -> PaperBroker {
        self.broker
    }

    pub fn position(&self) -> Option<&Position> {
        self.broker.position(&self.symbol)
    }

    pub fn position_mut(&mut self) -> Option<&mut Position> {
        self.broker.position_mut(&self.symbol)
    }

    /// Signals that were discarded by the risk gate, the sizer or the broker.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Start-of-bar bookkeeping for the risk gate.
    pub fn on_bar(&mut self, time: DateTime<Utc>) {
        let equity = self.broker.portfolio().equity;
        self.risk.on_bar(time, equity);
    }

    /// Try to act on a signal.
    ///
    /// Recoverable failures (risk rejection, degenerate stop, not enough cash)
    /// are logged and reported as `Ok(None)`. Anything else is a bug and is
    /// propagated.
    pub fn try_open(&mut self, time: DateTime<Utc>, signal: &EntrySignal) -> Result<Option<Position>> {
        if self.position().is_some() {
            debug!(
                symbol = %self.symbol,
                reason = %RejectionReason::PositionAlreadyOpen,
                "Signal ignored"
            );
            return Ok(None);
        }

        match self.open(time, signal) {
            Ok(position) => {
                info!(
                    symbol = %self.symbol,
                    side = %position.side,
                    entry = position.entry_price,
                    stop = position.initial_stop,
                    qty = position.quantity,
                    time = %time,
                    "Position opened"
                );
                Ok(Some(position))
            }
            Err(e) if e.is_recoverable() => {
                warn!(symbol = %self.symbol, error = %e, "Signal discarded");
                self.rejected += 1;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn open(&mut self, time: DateTime<Utc>, signal: &EntrySignal) -> Result<Position> {
        self.risk
            .check_entry(self.broker.portfolio())
            .map_err(|reason| Error::OrderRejected { reason })?;
        let equity = self.broker.portfolio().equity;
        let quantity = self.sizer.quantity(equity, signal)?;
        let position = self.broker.open(&self.symbol, time, signal, quantity)?;
        Ok(position.clone())
    }

    pub fn close(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
        forced: bool,
    ) -> Result<ClosedTrade> {
        let trade = self.broker.close(&self.symbol, time, price, reason, forced)?;
        info!(
            symbol = %trade.symbol,
            side = %trade.side,
            exit = trade.exit_price,
            pnl = trade.pnl,
            r = trade.pnl_r,
            reason = %trade.exit_reason,
            time = %time,
            "Position closed"
        );
        Ok(trade)
    }

    /// Revalue at `price` and return equity.
    pub fn mark(&mut self, price: f64) -> f64 {
        self.broker.update_price(&self.symbol, price);
        self.broker.mark_to_market()
    }
}
