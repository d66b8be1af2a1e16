//! Buy and hold — one LONG per symbol on its first usable bar.

use std::collections::BTreeSet;

use super::{Strategy, StrategyError};
use crate::domain::BarField;
use crate::event::{MarketEvent, SignalDirection, SignalEvent};
use crate::price::PriceHandler;
use crate::sizing::SizingPolicy;

#[derive(Debug, Clone)]
pub struct BuyAndHold {
    strength: f64,
    sizing: SizingPolicy,
    bought: BTreeSet<String>,
}

impl BuyAndHold {
    pub fn new(strength: f64, sizing: SizingPolicy) -> Self {
        Self { strength, sizing, bought: BTreeSet::new() }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn calculate_signals(
        &mut self,
        market: &MarketEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        let mut signals = Vec::new();
        for symbol in prices.symbols() {
            if self.bought.contains(symbol) {
                continue;
            }
            // Void bars before a symbol's history starts are skipped.
            if !prices.latest_bar_value(symbol, BarField::Close)?.is_finite() {
                continue;
            }
            self.bought.insert(symbol.clone());
            signals.push(SignalEvent {
                strategy_id: self.name().to_string(),
                symbol: symbol.clone(),
                datetime: market.datetime,
                direction: SignalDirection::Long,
                strength: self.strength,
                sizing: self.sizing,
            });
        }
        Ok(signals)
    }
}
