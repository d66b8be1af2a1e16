//! Events — the immutable messages passed through the session loop.
//!
//! Every component communicates only through these types. The queue is owned
//! by the session and handed to the price handler explicitly; nothing reaches
//! for a global queue.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::sizing::SizingPolicy;

/// Direction a strategy wants to take on a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Long,
    Short,
    Exit,
}

/// Side of an order or fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Side that flattens a signed position.
    pub fn closing(position: f64) -> Self {
        if position > 0.0 {
            Self::Sell
        } else {
            Self::Buy
        }
    }
}

/// Order type carried by an order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
}

/// A new bar is available for every symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub datetime: NaiveDateTime,
}

/// A strategy's request to trade, sized later by the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub strategy_id: String,
    pub symbol: String,
    pub datetime: NaiveDateTime,
    pub direction: SignalDirection,
    /// Policy-dependent: units, dollars, or a fraction of equity.
    pub strength: f64,
    /// Sizing policy requested for this signal.
    pub sizing: SizingPolicy,
}

/// A sized order ready for the execution handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub symbol: String,
    pub order_type: OrderType,
    pub quantity: f64,
    pub direction: OrderSide,
    /// Broker lot (ticket) this order acts on; 0 when opening a new lot.
    pub lot_id: u64,
    pub is_exit: bool,
}

impl OrderEvent {
    /// Market order opening or adding to a position.
    pub fn market(symbol: impl Into<String>, quantity: f64, direction: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            order_type: OrderType::Market,
            quantity: quantity.abs(),
            direction,
            lot_id: 0,
            is_exit: false,
        }
    }

    /// Market order reducing or closing a position.
    pub fn exit(symbol: impl Into<String>, quantity: f64, direction: OrderSide) -> Self {
        Self {
            is_exit: true,
            ..Self::market(symbol, quantity, direction)
        }
    }

    pub fn with_lot(mut self, lot_id: u64) -> Self {
        self.lot_id = lot_id;
        self
    }

    /// Signed quantity: positive for buys, negative for sells.
    pub fn signed_quantity(&self) -> f64 {
        self.direction.sign() * self.quantity
    }
}

/// An executed order as reported by the (simulated or real) exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub datetime: NaiveDateTime,
    pub symbol: String,
    pub exchange: String,
    pub quantity: f64,
    pub direction: OrderSide,
    /// Price per unit at which the order filled.
    pub fill_cost: f64,
    pub commission: f64,
    pub lot_id: u64,
}

impl FillEvent {
    pub fn signed_quantity(&self) -> f64 {
        self.direction.sign() * self.quantity
    }
}

/// Tagged union of every message the session loop dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
    /// Non-trading day or session close.
    Close,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Market(_) => "MARKET",
            Self::Signal(_) => "SIGNAL",
            Self::Order(_) => "ORDER",
            Self::Fill(_) => "FILL",
            Self::Close => "CLOSE",
        }
    }
}

/// FIFO event queue drained non-blockingly once per tick.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Non-blocking get: `None` means the tick is fully drained.
    pub fn get(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Extend<Event> for EventQueue {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        self.events.extend(iter);
    }
}
