//! Books — position and holdings accounting.
//!
//! A book owns the current positions and the working holdings row, and
//! appends an immutable snapshot to its [`Ledger`] on every time index.
//! Three implementations share the trait: an unlevered equity book, a
//! margin book for leveraged contracts, and the broker-backed live book.

pub mod equity;
pub mod margin;

pub use equity::{DividendTreatment, EquityBook};
pub use margin::MarginBook;

use thiserror::Error;

use crate::broker::BrokerError;
use crate::domain::{Ledger, SymbolInfo};
use crate::event::{FillEvent, OrderEvent};
use crate::price::{PriceError, PriceHandler};

#[derive(Debug, Error)]
pub enum BookError {
    #[error("symbol not tracked by book: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("invalid symbol info for {symbol}: {reason}")]
    InvalidSymbolInfo { symbol: String, reason: String },

    #[error("insufficient margin for {symbol}: requires {required:.2}, free {free:.2}")]
    InsufficientMargin {
        symbol: String,
        required: f64,
        free: f64,
    },

    #[error("no usable price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("invalid fill for {symbol}: {reason}")]
    InvalidFill { symbol: String, reason: String },

    #[error("invalid order for {symbol}: {reason}")]
    InvalidOrder { symbol: String, reason: String },

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl BookError {
    /// Broker connectivity problems that a live session can ride out.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Broker(e) if e.is_transient())
    }
}

/// Position and holdings ledger driven by market and fill events.
pub trait Book: Send + Sync {
    fn name(&self) -> &str;

    fn symbols(&self) -> &[String];

    /// Current signed position; 0.0 for untracked symbols.
    fn position(&self, symbol: &str) -> f64;

    /// Current total equity of the working holdings row.
    fn total_equity(&self) -> f64;

    /// Contract metadata, for books that trade leveraged instruments.
    fn symbol_info(&self, _symbol: &str) -> Option<&SymbolInfo> {
        None
    }

    fn ledger(&self) -> &Ledger;

    /// Mark to market at the handler's current time index and append a
    /// snapshot to the ledger.
    fn update_timeindex(&mut self, prices: &dyn PriceHandler) -> Result<(), BookError>;

    /// Apply an executed fill to positions, cash and the trade log.
    fn update_fill(&mut self, fill: &FillEvent) -> Result<(), BookError>;

    /// Pre-trade check; an error here rejects the order.
    fn check_order(&mut self, _order: &OrderEvent, _prices: &dyn PriceHandler) -> Result<(), BookError> {
        Ok(())
    }

    /// Split an order into the orders actually sent to execution. An error
    /// means the order cannot be placed as sized and is rejected.
    fn route_order(&mut self, order: OrderEvent) -> Result<Vec<OrderEvent>, BookError> {
        Ok(vec![order])
    }
}

/// Exposure-reducing orders never need margin.
pub(crate) fn reduces_exposure(order: &OrderEvent, position: f64) -> bool {
    if order.is_exit {
        return true;
    }
    position != 0.0
        && order.direction.sign() != position.signum()
        && order.quantity <= position.abs()
}
