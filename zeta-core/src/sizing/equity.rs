//! Cash- and equity-based sizing for unlevered instruments.

use super::{entry, flatten, is_flat, usable_close, SizingContext, SizingError};
use crate::domain::round_down_to_lot;
use crate::event::{OrderEvent, OrderSide, SignalDirection, SignalEvent};

/// `strength` dollars worth at the latest close.
pub fn dollar_amount(
    signal: &SignalEvent,
    ctx: &SizingContext<'_>,
    stackable: bool,
) -> Result<Option<OrderEvent>, SizingError> {
    if signal.direction == SignalDirection::Exit {
        return Ok(flatten(&signal.symbol, ctx.position));
    }
    let close = usable_close(signal, ctx.last_close)?;
    let quantity = round_down_to_lot(signal.strength / close, ctx.lot_size);
    Ok(entry(signal, ctx.position, quantity, stackable))
}

/// `strength` fraction of total equity at the latest close; only when flat.
pub fn percent_equity(
    signal: &SignalEvent,
    ctx: &SizingContext<'_>,
) -> Result<Option<OrderEvent>, SizingError> {
    if signal.direction == SignalDirection::Exit {
        return Ok(flatten(&signal.symbol, ctx.position));
    }
    let close = usable_close(signal, ctx.last_close)?;
    let quantity = round_down_to_lot(signal.strength * ctx.equity / close, ctx.lot_size);
    Ok(entry(signal, ctx.position, quantity, false))
}

/// Trade the difference between the current position and a target of
/// `±floor(strength · equity / close)`; EXIT targets zero.
///
/// A target on the other side of zero is returned unchanged and rejected by
/// the flip guard in [`super::resize`].
pub fn percent_equity_capped(
    signal: &SignalEvent,
    ctx: &SizingContext<'_>,
) -> Result<Option<OrderEvent>, SizingError> {
    let target = match signal.direction {
        SignalDirection::Exit => return Ok(flatten(&signal.symbol, ctx.position)),
        SignalDirection::Long | SignalDirection::Short => {
            let close = usable_close(signal, ctx.last_close)?;
            let units = round_down_to_lot(signal.strength * ctx.equity / close, ctx.lot_size).max(0.0);
            if signal.direction == SignalDirection::Long {
                units
            } else {
                -units
            }
        }
    };

    let delta = target - ctx.position;
    if is_flat(delta) {
        return Ok(None);
    }
    let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
    let reduces = !is_flat(ctx.position) && delta.signum() != ctx.position.signum();
    let order = if reduces && delta.abs() <= ctx.position.abs() {
        OrderEvent::exit(signal.symbol.clone(), delta, side)
    } else {
        OrderEvent::market(signal.symbol.clone(), delta, side)
    };
    Ok(Some(order))
}
