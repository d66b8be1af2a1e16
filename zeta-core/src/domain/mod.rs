//! Domain types shared by price handlers, books and the session.

pub mod bar;
pub mod ledger;
pub mod symbol_info;

pub use bar::{Bar, BarField, CorporateAction, UnknownBarField};
pub use ledger::{HoldingsSnapshot, Ledger, MarginState, PositionSnapshot, TradeRecord};
pub use symbol_info::{round_down_to_lot, SymbolInfo};

/// Symbol type alias
pub type Symbol = String;
