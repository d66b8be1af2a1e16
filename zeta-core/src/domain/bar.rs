//! Bar — one OHLCV observation for a symbol at a time index.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// OHLCV bar for a single symbol at a single time index.
///
/// Alignment across symbols can produce void bars (all-NaN prices) for
/// time indices before a symbol's first observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub datetime: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

impl Bar {
    /// A bar with no price information at `datetime`.
    pub fn void(symbol: impl Into<String>, datetime: NaiveDateTime) -> Self {
        Self {
            symbol: symbol.into(),
            datetime,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            adj_close: f64::NAN,
            volume: 0,
        }
    }

    /// A flat bar carrying `previous`'s close forward to `datetime`.
    pub fn padded_from(previous: &Bar, datetime: NaiveDateTime) -> Self {
        let close = previous.close;
        Self {
            symbol: previous.symbol.clone(),
            datetime,
            open: close,
            high: close,
            low: close,
            close,
            adj_close: previous.adj_close,
            volume: 0,
        }
    }

    /// Returns true if any price field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan()
            || self.high.is_nan()
            || self.low.is_nan()
            || self.close.is_nan()
            || self.adj_close.is_nan()
    }

    /// high >= low, high/low bracket open and close, prices positive.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    pub fn date(&self) -> NaiveDate {
        self.datetime.date()
    }

    pub fn value(&self, field: BarField) -> f64 {
        match field {
            BarField::Open => self.open,
            BarField::High => self.high,
            BarField::Low => self.low,
            BarField::Close => self.close,
            BarField::AdjClose => self.adj_close,
            BarField::Volume => self.volume as f64,
        }
    }
}

/// Named bar field for `latest_bar_value` lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    AdjClose,
    Volume,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown bar field: {0}")]
pub struct UnknownBarField(pub String);

impl FromStr for BarField {
    type Err = UnknownBarField;

    /// Accepts both short names (`close`) and vendor column names (`close_price`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "open_price" => Ok(Self::Open),
            "high" | "high_price" => Ok(Self::High),
            "low" | "low_price" => Ok(Self::Low),
            "close" | "close_price" => Ok(Self::Close),
            "adj_close" | "adj_close_price" => Ok(Self::AdjClose),
            "volume" => Ok(Self::Volume),
            _ => Err(UnknownBarField(s.to_string())),
        }
    }
}

/// Split and dividend recorded for a symbol on a date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub date: NaiveDate,
    /// New shares per old share; 1.0 means no split.
    #[serde(default = "one")]
    pub split_ratio: f64,
    /// Cash paid per share held.
    #[serde(default)]
    pub dividend: f64,
}

fn one() -> f64 {
    1.0
}

impl CorporateAction {
    pub fn has_split(&self) -> bool {
        self.split_ratio.is_finite() && self.split_ratio > 0.0 && self.split_ratio != 1.0
    }

    pub fn has_dividend(&self) -> bool {
        self.dividend.is_finite() && self.dividend != 0.0
    }
}
