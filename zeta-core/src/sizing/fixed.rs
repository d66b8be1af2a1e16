//! Unit-count sizing: `strength` is the quantity itself.

use super::{entry, flatten, SizingContext};
use crate::domain::round_down_to_lot;
use crate::event::{OrderEvent, SignalDirection, SignalEvent};

/// Only EXIT produces an order.
pub fn exit_all(signal: &SignalEvent, ctx: &SizingContext<'_>) -> Option<OrderEvent> {
    match signal.direction {
        SignalDirection::Exit => flatten(&signal.symbol, ctx.position),
        SignalDirection::Long | SignalDirection::Short => None,
    }
}

/// `strength` units, rounded down to the lot size.
pub fn naive(signal: &SignalEvent, ctx: &SizingContext<'_>, stackable: bool) -> Option<OrderEvent> {
    let quantity = round_down_to_lot(signal.strength, ctx.lot_size);
    entry(signal, ctx.position, quantity, stackable)
}
