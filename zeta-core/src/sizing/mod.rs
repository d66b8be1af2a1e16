//! Position sizing — turn a signal into a concrete order.
//!
//! Sizing policies form a closed set selected per signal. Each policy only
//! decides the entry quantity; every policy flattens the whole position on
//! EXIT. An order that would flip a position through zero in one fill is an
//! error, so reversals always go through an explicit exit first.

pub mod equity;
pub mod fixed;
pub mod risk;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SymbolInfo;
use crate::event::{OrderEvent, OrderSide, SignalDirection, SignalEvent};

/// Positions smaller than this are treated as flat.
pub const FLAT_EPSILON: f64 = 1e-9;

pub fn is_flat(position: f64) -> bool {
    position.abs() < FLAT_EPSILON
}

/// Sizing policy selected by a strategy for one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SizingPolicy {
    /// Ignore entries; flatten on EXIT.
    ExitAll,
    /// `strength` units, only when flat.
    #[default]
    Naive,
    /// `strength` units, adding to any existing position.
    NaiveStackable,
    /// `strength` dollars' worth, only when flat.
    DollarAmount,
    /// `strength` dollars' worth, adding to any existing position.
    DollarAmountStackable,
    /// `strength` fraction of equity, only when flat.
    PercentEquity,
    /// Trade toward a target of `strength` fraction of equity.
    PercentEquityCapped,
    /// Risk `strength` fraction of equity over a `price_risk` adverse move.
    PercentEquityRisk { price_risk: f64 },
    /// `strength` fraction of equity in contract notional.
    PercentTotalEquity,
}

impl SizingPolicy {
    pub fn key(&self) -> &'static str {
        match self {
            Self::ExitAll => "exit_all",
            Self::Naive => "naive",
            Self::NaiveStackable => "naive_stackable",
            Self::DollarAmount => "dollar_amount",
            Self::DollarAmountStackable => "dollar_amount_stackable",
            Self::PercentEquity => "percent_equity",
            Self::PercentEquityCapped => "percent_equity_capped",
            Self::PercentEquityRisk { .. } => "percent_equity_risk",
            Self::PercentTotalEquity => "percent_total_equity",
        }
    }

    /// Policies that need broker contract metadata.
    pub fn needs_symbol_info(&self) -> bool {
        matches!(self, Self::PercentEquityRisk { .. } | Self::PercentTotalEquity)
    }
}

impl fmt::Display for SizingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PercentEquityRisk { price_risk } => write!(f, "{}:{price_risk}", self.key()),
            _ => f.write_str(self.key()),
        }
    }
}

impl FromStr for SizingPolicy {
    type Err = SizingError;

    /// Parses a policy key; `percent_equity_risk:<price_risk>` carries its parameter.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, param) = match s.split_once(':') {
            Some((key, param)) => (key.trim(), Some(param.trim())),
            None => (s.trim(), None),
        };
        let not_found = || SizingError::MethodNotFound { key: s.to_string() };
        let policy = match key {
            "exit_all" => Self::ExitAll,
            "naive" => Self::Naive,
            "naive_stackable" => Self::NaiveStackable,
            "dollar_amount" => Self::DollarAmount,
            "dollar_amount_stackable" => Self::DollarAmountStackable,
            "percent_equity" => Self::PercentEquity,
            "percent_equity_capped" => Self::PercentEquityCapped,
            "percent_total_equity" => Self::PercentTotalEquity,
            "percent_equity_risk" => {
                let price_risk = param
                    .and_then(|p| p.parse::<f64>().ok())
                    .ok_or_else(not_found)?;
                return Ok(Self::PercentEquityRisk { price_risk });
            }
            _ => return Err(not_found()),
        };
        if param.is_some() {
            return Err(not_found());
        }
        Ok(policy)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("sizing method not found: {key}")]
    MethodNotFound { key: String },

    #[error("sizing method {method} requires symbol info for {symbol}")]
    MissingSymbolInfo { method: &'static str, symbol: String },

    #[error("no usable close price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("invalid {what} {value} for sizing method {method}")]
    InvalidParameter {
        method: &'static str,
        what: &'static str,
        value: f64,
    },

    #[error("{direction:?} {quantity} {symbol} would flip position {position} through zero")]
    WouldFlipPosition {
        symbol: String,
        direction: OrderSide,
        quantity: f64,
        position: f64,
    },
}

/// Book state a policy sizes against.
#[derive(Debug, Clone, Copy)]
pub struct SizingContext<'a> {
    /// Current signed position in the signal's symbol.
    pub position: f64,
    /// Current total equity of the book.
    pub equity: f64,
    /// Latest close of the signal's symbol; may be NaN.
    pub last_close: f64,
    /// Lot granularity for unlevered books.
    pub lot_size: f64,
    pub symbol_info: Option<&'a SymbolInfo>,
}

/// Size `signal` against `ctx`. `Ok(None)` means nothing to trade.
pub fn resize(signal: &SignalEvent, ctx: &SizingContext<'_>) -> Result<Option<OrderEvent>, SizingError> {
    let method = signal.sizing.key();
    if !signal.strength.is_finite() || signal.strength < 0.0 {
        return Err(SizingError::InvalidParameter {
            method,
            what: "strength",
            value: signal.strength,
        });
    }

    let order = match signal.sizing {
        SizingPolicy::ExitAll => fixed::exit_all(signal, ctx),
        SizingPolicy::Naive => fixed::naive(signal, ctx, false),
        SizingPolicy::NaiveStackable => fixed::naive(signal, ctx, true),
        SizingPolicy::DollarAmount => equity::dollar_amount(signal, ctx, false)?,
        SizingPolicy::DollarAmountStackable => equity::dollar_amount(signal, ctx, true)?,
        SizingPolicy::PercentEquity => equity::percent_equity(signal, ctx)?,
        SizingPolicy::PercentEquityCapped => equity::percent_equity_capped(signal, ctx)?,
        SizingPolicy::PercentEquityRisk { price_risk } => {
            risk::percent_equity_risk(signal, ctx, price_risk)?
        }
        SizingPolicy::PercentTotalEquity => risk::percent_total_equity(signal, ctx)?,
    };

    match order {
        Some(order) if is_flat(order.quantity) => Ok(None),
        Some(order) => {
            guard_flip(&order, ctx.position)?;
            Ok(Some(order))
        }
        None => Ok(None),
    }
}

/// Reject an order whose fill would take the position through zero.
fn guard_flip(order: &OrderEvent, position: f64) -> Result<(), SizingError> {
    let after = position + order.signed_quantity();
    if !is_flat(position) && !is_flat(after) && after.signum() != position.signum() {
        return Err(SizingError::WouldFlipPosition {
            symbol: order.symbol.clone(),
            direction: order.direction,
            quantity: order.quantity,
            position,
        });
    }
    Ok(())
}

// ─── Shared helpers ──────────────────────────────────────────────────

/// Exit order for the whole position, or `None` when already flat.
pub(crate) fn flatten(symbol: &str, position: f64) -> Option<OrderEvent> {
    if is_flat(position) {
        return None;
    }
    Some(OrderEvent::exit(symbol, position.abs(), OrderSide::closing(position)))
}

/// Entry order in the signal's direction; EXIT always flattens.
///
/// `stackable == false` skips entries unless the position is flat.
pub(crate) fn entry(
    signal: &SignalEvent,
    position: f64,
    quantity: f64,
    stackable: bool,
) -> Option<OrderEvent> {
    let side = match signal.direction {
        SignalDirection::Exit => return flatten(&signal.symbol, position),
        SignalDirection::Long => OrderSide::Buy,
        SignalDirection::Short => OrderSide::Sell,
    };
    if !stackable && !is_flat(position) {
        return None;
    }
    if is_flat(quantity) {
        return None;
    }
    Some(OrderEvent::market(signal.symbol.clone(), quantity, side))
}

pub(crate) fn usable_close(signal: &SignalEvent, close: f64) -> Result<f64, SizingError> {
    if close.is_finite() && close > 0.0 {
        Ok(close)
    } else {
        Err(SizingError::PriceUnavailable { symbol: signal.symbol.clone() })
    }
}

pub(crate) fn require_info<'a>(
    signal: &SignalEvent,
    ctx: &SizingContext<'a>,
) -> Result<&'a SymbolInfo, SizingError> {
    ctx.symbol_info.ok_or_else(|| SizingError::MissingSymbolInfo {
        method: signal.sizing.key(),
        symbol: signal.symbol.clone(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::NaiveDate;

    pub fn signal(direction: SignalDirection, strength: f64, sizing: SizingPolicy) -> SignalEvent {
        SignalEvent {
            strategy_id: "test".into(),
            symbol: "AAA".into(),
            datetime: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            direction,
            strength,
            sizing,
        }
    }

    pub fn ctx(position: f64, equity: f64, last_close: f64) -> SizingContext<'static> {
        SizingContext {
            position,
            equity,
            last_close,
            lot_size: 1.0,
            symbol_info: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ctx, signal};
    use super::*;

    #[test]
    fn parse_known_keys() {
        assert_eq!("naive".parse::<SizingPolicy>(), Ok(SizingPolicy::Naive));
        assert_eq!(
            "percent_equity_capped".parse::<SizingPolicy>(),
            Ok(SizingPolicy::PercentEquityCapped)
        );
        assert_eq!(
            "percent_equity_risk:0.02".parse::<SizingPolicy>(),
            Ok(SizingPolicy::PercentEquityRisk { price_risk: 0.02 })
        );
    }

    #[test]
    fn parse_unknown_key_fails() {
        let err = "martingale".parse::<SizingPolicy>().unwrap_err();
        assert_eq!(err, SizingError::MethodNotFound { key: "martingale".into() });
        assert!("percent_equity_risk".parse::<SizingPolicy>().is_err());
        assert!("naive:3".parse::<SizingPolicy>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let policy = SizingPolicy::PercentEquityRisk { price_risk: 1.5 };
        assert_eq!(policy.to_string().parse::<SizingPolicy>(), Ok(policy));
    }

    #[test]
    fn serde_uses_method_tag() {
        let json = serde_json::to_string(&SizingPolicy::PercentEquityRisk { price_risk: 0.5 }).unwrap();
        assert_eq!(json, r#"{"method":"percent_equity_risk","price_risk":0.5}"#);
    }

    #[test]
    fn every_policy_flattens_on_exit() {
        let policies = [
            SizingPolicy::ExitAll,
            SizingPolicy::Naive,
            SizingPolicy::NaiveStackable,
            SizingPolicy::DollarAmount,
            SizingPolicy::DollarAmountStackable,
            SizingPolicy::PercentEquity,
            SizingPolicy::PercentEquityCapped,
        ];
        for policy in policies {
            let order = resize(&signal(SignalDirection::Exit, 10.0, policy), &ctx(-40.0, 1e5, 10.0))
                .unwrap()
                .unwrap();
            assert!(order.is_exit, "{policy} should emit an exit");
            assert_eq!(order.quantity, 40.0);
            assert_eq!(order.direction, OrderSide::Buy);
        }
    }

    #[test]
    fn exit_when_flat_is_nothing() {
        let order = resize(&signal(SignalDirection::Exit, 1.0, SizingPolicy::Naive), &ctx(0.0, 1e5, 10.0)).unwrap();
        assert!(order.is_none());
    }

    #[test]
    fn stackable_short_against_long_would_flip() {
        let err = resize(
            &signal(SignalDirection::Short, 150.0, SizingPolicy::NaiveStackable),
            &ctx(100.0, 1e5, 10.0),
        )
        .unwrap_err();
        assert!(matches!(err, SizingError::WouldFlipPosition { position, .. } if position == 100.0));
    }

    #[test]
    fn stackable_reduction_is_allowed() {
        let order = resize(
            &signal(SignalDirection::Short, 60.0, SizingPolicy::NaiveStackable),
            &ctx(100.0, 1e5, 10.0),
        )
        .unwrap()
        .unwrap();
        assert_eq!(order.direction, OrderSide::Sell);
        assert_eq!(order.quantity, 60.0);
    }

    #[test]
    fn negative_strength_is_rejected() {
        let err = resize(&signal(SignalDirection::Long, -1.0, SizingPolicy::Naive), &ctx(0.0, 1e5, 10.0))
            .unwrap_err();
        assert!(matches!(err, SizingError::InvalidParameter { what: "strength", .. }));
    }
}
