//! Contract-aware sizing for leveraged instruments.
//!
//! Both policies need [`SymbolInfo`](crate::domain::SymbolInfo) and round to
//! the broker's minimum lot. Entries stack onto existing positions.

use super::{entry, flatten, require_info, usable_close, SizingContext, SizingError};
use crate::event::{OrderEvent, SignalDirection, SignalEvent};

/// Risk `strength` of equity on a `price_risk` move against the position.
///
/// Contract risk is ticks-at-risk × contract size × tick size; for inverse
/// quotes it is the reciprocal.
pub fn percent_equity_risk(
    signal: &SignalEvent,
    ctx: &SizingContext<'_>,
    price_risk: f64,
) -> Result<Option<OrderEvent>, SizingError> {
    if signal.direction == SignalDirection::Exit {
        return Ok(flatten(&signal.symbol, ctx.position));
    }
    let info = require_info(signal, ctx)?;
    let method = signal.sizing.key();
    if !price_risk.is_finite() || price_risk == 0.0 {
        return Err(SizingError::InvalidParameter { method, what: "price_risk", value: price_risk });
    }
    if !(info.tick_size.is_finite() && info.tick_size > 0.0) {
        return Err(SizingError::InvalidParameter { method, what: "tick_size", value: info.tick_size });
    }

    let tick_value = info.contract_size * info.tick_size;
    let ticks_at_risk = (price_risk / info.tick_size).abs();
    let mut contract_risk = ticks_at_risk * tick_value;
    if info.inverse_quote {
        contract_risk = 1.0 / contract_risk;
    }
    let quantity = info.round_down(ctx.equity * signal.strength / contract_risk).max(0.0);
    Ok(entry(signal, ctx.position, quantity, true))
}

/// `strength` of equity in contract notional at the latest close.
pub fn percent_total_equity(
    signal: &SignalEvent,
    ctx: &SizingContext<'_>,
) -> Result<Option<OrderEvent>, SizingError> {
    if signal.direction == SignalDirection::Exit {
        return Ok(flatten(&signal.symbol, ctx.position));
    }
    let info = require_info(signal, ctx)?;
    let close = usable_close(signal, ctx.last_close)?;
    let per_contract = info.contract_size * info.effective_price(close);
    let quantity = info.round_down(ctx.equity * signal.strength / per_contract).max(0.0);
    Ok(entry(signal, ctx.position, quantity, true))
}
