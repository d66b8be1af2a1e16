//! Broker integration — live trading against a brokerage account.
//!
//! [`BrokerClient`] is the seam: the live book, execution handler and price
//! handler only talk to the broker through it, so tests substitute an
//! in-memory broker. [`XtbClient`] implements it over the XTB command
//! protocol.

pub mod live_book;
pub mod live_execution;
pub mod live_price;
pub mod xtb;

pub use live_book::{LiveBook, Lot};
pub use live_execution::LiveExecution;
pub use live_price::LivePriceHandler;
pub use xtb::{XtbClient, XtbConfig};

use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, SymbolInfo};
use crate::event::OrderSide;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("broker rejected {command}: {code} {description}")]
    Api {
        command: String,
        code: String,
        description: String,
    },

    #[error("unexpected response to {command}: {message}")]
    ResponseFormat { command: String, message: String },

    #[error("symbol not found at broker: {symbol}")]
    SymbolNotFound { symbol: String },
}

impl BrokerError {
    /// Errors worth retrying on the next heartbeat.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnreachable(_))
    }
}

/// Account-level balances, in account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    /// Margin currently in use.
    pub margin: f64,
    pub currency: String,
}

/// An open trade (ticket) at the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub lot_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub open_price: f64,
    pub opened_at: NaiveDateTime,
    /// Unrealised profit in account currency.
    pub profit: f64,
    /// Zero for pending trades that have not opened yet.
    pub close_price: f64,
}

/// Contract specification plus current quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSymbol {
    pub symbol: String,
    pub contract_size: f64,
    pub tick_size: f64,
    pub tick_value: f64,
    pub leverage: f64,
    pub lot_min: f64,
    pub ask: f64,
    pub bid: f64,
    /// Currency profits are quoted in.
    pub currency_profit: String,
}

impl BrokerSymbol {
    pub fn symbol_info(&self) -> SymbolInfo {
        SymbolInfo {
            contract_size: self.contract_size,
            tick_size: self.tick_size,
            tick_value: self.tick_value,
            leverage: self.leverage,
            lot_min: self.lot_min,
            inverse_quote: false,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.ask + self.bid) / 2.0
    }
}

/// What a trade transaction does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Open,
    Close,
    Modify,
    Delete,
}

impl TransactionKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Close => 2,
            Self::Modify => 3,
            Self::Delete => 4,
        }
    }
}

/// A market transaction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTransaction {
    pub kind: TransactionKind,
    pub side: OrderSide,
    pub symbol: String,
    pub volume: f64,
    /// Ticket acted on; 0 when opening.
    pub lot_id: u64,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Error,
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Error),
            1 => Some(Self::Pending),
            3 => Some(Self::Accepted),
            4 => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub order: u64,
    pub status: RequestStatus,
    pub ask: f64,
    pub bid: f64,
    pub message: Option<String>,
}

/// Brokerage account operations used by the live session.
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &str;

    fn account_info(&self) -> Result<AccountInfo, BrokerError>;

    fn open_trades(&self) -> Result<Vec<OpenTrade>, BrokerError>;

    fn symbol(&self, symbol: &str) -> Result<BrokerSymbol, BrokerError>;

    /// Margin required to hold `volume` lots of `symbol`.
    fn margin_requirement(&self, symbol: &str, volume: f64) -> Result<f64, BrokerError>;

    /// Submit a transaction; returns the broker's order number.
    fn submit(&self, transaction: &TradeTransaction) -> Result<u64, BrokerError>;

    fn transaction_status(&self, order: u64) -> Result<TransactionStatus, BrokerError>;

    /// The `count` most recent bars of `period_minutes` length, oldest first.
    fn chart_bars(&self, symbol: &str, period_minutes: u32, count: usize) -> Result<Vec<Bar>, BrokerError>;
}

/// Pause between broker calls so the API is not flooded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// No pause; for in-memory brokers.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}
