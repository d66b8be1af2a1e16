//! Price handlers — the session's only view of market data.
//!
//! A handler advances one time index per `update_bars` call and answers
//! lookups about the bars seen so far. It never exposes bars beyond the
//! current index, except `next_open_price`, which the simulated execution
//! handler uses to fill at the following open.

pub mod align;
pub mod historic;
pub mod store;

pub use align::{align_pad, AlignedBars};
pub use historic::HistoricPriceHandler;
pub use store::{load_historic, CsvPriceStore, MemoryPriceStore, PriceStore};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::BrokerError;
use crate::domain::{Bar, BarField};
use crate::event::EventQueue;

/// Bar frequency of a feed. Corporate actions only apply to daily bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Intraday,
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("symbol not found: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("no bar available yet for {symbol}")]
    NoBarYet { symbol: String },

    #[error("no next bar for {symbol}")]
    NoNextBar { symbol: String },

    #[error("no price data for {symbol}")]
    NoData { symbol: String },

    #[error("bars for {symbol} are not strictly increasing at {datetime}")]
    NonMonotonic {
        symbol: String,
        datetime: NaiveDateTime,
    },

    #[error("malformed price record in {source_name}: {message}")]
    Malformed {
        source_name: String,
        message: String,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker feed error: {0}")]
    Broker(#[from] BrokerError),
}

/// Source of bars for the session loop.
///
/// Implementations are either historic (replaying stored bars) or live
/// (polling a broker feed). All lookups are by symbol; an unknown symbol is
/// an error, while a missing value at a known symbol is a NaN price.
pub trait PriceHandler: Send + Sync {
    fn name(&self) -> &str;

    fn symbols(&self) -> &[String];

    fn frequency(&self) -> Frequency;

    /// Advance one time index and push a market event onto `queue`.
    ///
    /// At the end of a historic feed this pushes nothing and
    /// `continue_backtest` turns false.
    fn update_bars(&mut self, queue: &mut EventQueue) -> Result<(), PriceError>;

    fn continue_backtest(&self) -> bool;

    fn latest_bar(&self, symbol: &str) -> Result<&Bar, PriceError>;

    /// Up to `n` most recent bars, oldest first. Fewer are returned near the
    /// start of the feed.
    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar], PriceError>;

    fn latest_bar_value(&self, symbol: &str, field: BarField) -> Result<f64, PriceError> {
        Ok(self.latest_bar(symbol)?.value(field))
    }

    /// Datetime of the current time index.
    fn latest_bar_datetime(&self) -> Result<NaiveDateTime, PriceError>;

    /// Open of the bar after the current one.
    fn next_open_price(&self, symbol: &str) -> Result<f64, PriceError>;

    /// Datetime of the time index after the current one, when the feed knows it.
    fn next_bar_datetime(&self) -> Option<NaiveDateTime> {
        None
    }

    /// Split ratio effective at the current time index; 1.0 when none.
    fn latest_bar_split(&self, _symbol: &str) -> Result<f64, PriceError> {
        Ok(1.0)
    }

    /// Dividend per share paid at the current time index; 0.0 when none.
    fn latest_bar_dividend(&self, _symbol: &str) -> Result<f64, PriceError> {
        Ok(0.0)
    }
}
