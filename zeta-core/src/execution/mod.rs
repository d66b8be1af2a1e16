//! Execution handlers — turn orders into fills.
//!
//! The simulated handler fills against the price handler's bars; the live
//! handler in [`crate::broker`] submits orders to a broker and keeps the ones
//! that could not be placed for retry on the next heartbeat.

pub mod commission;
pub mod simulated;

pub use commission::CommissionModel;
pub use simulated::{FillTiming, SimulatedExecution, BACKTEST_EXCHANGE};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::BrokerError;
use crate::event::{FillEvent, OrderEvent};
use crate::price::{PriceError, PriceHandler};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("exit order for {symbol} has no lot id")]
    MissingLotId { symbol: String },

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// An order the handler gave up on, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedOrder {
    pub datetime: Option<NaiveDateTime>,
    pub order: OrderEvent,
    pub reason: String,
}

pub trait ExecutionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Execute one order. `Ok(None)` means no fill this tick: the order was
    /// dropped or is waiting on the broker.
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Option<FillEvent>, ExecutionError>;

    /// Retry orders that could not be placed earlier. Called once per heartbeat.
    fn execute_pending_orders(
        &mut self,
        _prices: &dyn PriceHandler,
    ) -> Result<Vec<FillEvent>, ExecutionError> {
        Ok(Vec::new())
    }

    /// Orders still waiting to be placed or confirmed.
    fn pending_orders(&self) -> Vec<OrderEvent> {
        Vec::new()
    }

    fn dropped_orders(&self) -> &[DroppedOrder] {
        &[]
    }
}
