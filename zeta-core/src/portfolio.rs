//! Portfolio — sizes signals against a book and records rejections.
//!
//! Position sizing and pre-trade checks live here; accounting lives in the
//! book. A signal that cannot be traded for a reason the market caused
//! (no price yet, insufficient margin, a reversal in one fill, a broker
//! refusal) becomes a [`Rejection`] and the session carries on. Configuration
//! problems, such as a policy that needs contract metadata the book does not
//! have, are errors.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::book::{Book, BookError};
use crate::domain::BarField;
use crate::event::{FillEvent, OrderEvent, OrderSide, SignalDirection, SignalEvent};
use crate::price::{PriceError, PriceHandler};
use crate::sizing::{resize, SizingContext, SizingError};

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error(transparent)]
    Book(#[from] BookError),

    #[error(transparent)]
    Price(#[from] PriceError),
}

/// A signal or order that was refused, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub datetime: NaiveDateTime,
    pub symbol: String,
    pub direction: SignalDirection,
    pub side: Option<OrderSide>,
    pub quantity: f64,
    pub price: f64,
    pub reason: String,
}

pub struct Portfolio<B: Book> {
    book: B,
    lot_size: f64,
    rejections: Vec<Rejection>,
}

impl<B: Book> Portfolio<B> {
    /// `lot_size` applies to symbols without broker contract metadata.
    pub fn new(book: B, lot_size: f64) -> Self {
        Self { book, lot_size, rejections: Vec::new() }
    }

    pub fn book(&self) -> &B {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut B {
        &mut self.book
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn into_book(self) -> B {
        self.book
    }

    pub fn update_timeindex(&mut self, prices: &dyn PriceHandler) -> Result<(), BookError> {
        self.book.update_timeindex(prices)
    }

    pub fn update_fill(&mut self, fill: &FillEvent) -> Result<(), BookError> {
        self.book.update_fill(fill)
    }

    /// Size `signal`, check it against the book and route it. Returns the
    /// orders to execute, possibly none.
    pub fn update_signal(
        &mut self,
        signal: &SignalEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<OrderEvent>, PortfolioError> {
        let last_close = prices.latest_bar_value(&signal.symbol, BarField::Close)?;
        let symbol_info = self.book.symbol_info(&signal.symbol).copied();
        let ctx = SizingContext {
            position: self.book.position(&signal.symbol),
            equity: self.book.total_equity(),
            last_close,
            lot_size: symbol_info.map_or(self.lot_size, |info| info.lot_min),
            symbol_info: symbol_info.as_ref(),
        };

        let order = match resize(signal, &ctx) {
            Ok(Some(order)) => order,
            Ok(None) => {
                debug!(symbol = %signal.symbol, direction = ?signal.direction, "signal sized to nothing");
                return Ok(Vec::new());
            }
            Err(e @ (SizingError::WouldFlipPosition { .. } | SizingError::PriceUnavailable { .. })) => {
                self.reject(signal, None, last_close, e.to_string());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        match self.book.check_order(&order, prices) {
            Ok(()) => {}
            Err(e @ (BookError::InsufficientMargin { .. } | BookError::Broker(_) | BookError::PriceUnavailable { .. })) => {
                self.reject(signal, Some(&order), last_close, e.to_string());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }

        match self.book.route_order(order.clone()) {
            Ok(routed) => Ok(routed),
            Err(e @ (BookError::InvalidOrder { .. } | BookError::UnknownSymbol { .. })) => {
                self.reject(signal, Some(&order), last_close, e.to_string());
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reject(&mut self, signal: &SignalEvent, order: Option<&OrderEvent>, price: f64, reason: String) {
        warn!(
            symbol = %signal.symbol,
            direction = ?signal.direction,
            quantity = order.map_or(0.0, |o| o.quantity),
            %reason,
            "signal rejected"
        );
        self.rejections.push(Rejection {
            datetime: signal.datetime,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            side: order.map(|o| o.direction),
            quantity: order.map_or(0.0, |o| o.quantity),
            price,
            reason,
        });
    }
}
