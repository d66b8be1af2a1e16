//! MarginBook — leveraged contracts with margin accounting.
//!
//! Holdings are contract notionals, so `total = cash + Σ notional` still
//! holds. Free margin is `total - Σ margin`, and new exposure is only
//! accepted while free margin covers it.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{reduces_exposure, Book, BookError};
use crate::domain::{
    BarField, HoldingsSnapshot, Ledger, MarginState, PositionSnapshot, SymbolInfo, TradeRecord,
};
use crate::event::{FillEvent, OrderEvent};
use crate::price::PriceHandler;

#[derive(Debug, Clone)]
pub struct MarginBook {
    symbols: Vec<String>,
    symbol_info: BTreeMap<String, SymbolInfo>,
    positions: BTreeMap<String, f64>,
    current: HoldingsSnapshot,
    ledger: Ledger,
    /// Margin claimed by orders accepted since the last mark, not yet filled.
    reserved: BTreeMap<String, f64>,
}

impl MarginBook {
    pub fn new(
        symbols: Vec<String>,
        initial_capital: f64,
        symbol_info: BTreeMap<String, SymbolInfo>,
    ) -> Result<Self, BookError> {
        for symbol in &symbols {
            let info = symbol_info.get(symbol).ok_or_else(|| BookError::InvalidSymbolInfo {
                symbol: symbol.clone(),
                reason: "missing".into(),
            })?;
            info.validate().map_err(|reason| BookError::InvalidSymbolInfo {
                symbol: symbol.clone(),
                reason,
            })?;
        }

        let positions: BTreeMap<String, f64> = symbols.iter().map(|s| (s.clone(), 0.0)).collect();
        let mut current = HoldingsSnapshot::opening(&symbols, initial_capital);
        current.margin = Some(MarginState {
            total_notional: 0.0,
            margins: symbols.iter().map(|s| (s.clone(), 0.0)).collect(),
            free_margin: initial_capital,
        });
        let ledger = Ledger::new(
            PositionSnapshot { datetime: None, positions: positions.clone() },
            current.clone(),
        );
        Ok(Self {
            symbols,
            symbol_info,
            positions,
            current,
            ledger,
            reserved: BTreeMap::new(),
        })
    }

    pub fn current_holdings(&self) -> &HoldingsSnapshot {
        &self.current
    }

    pub fn free_margin(&self) -> f64 {
        self.current.margin.as_ref().map_or(self.current.total, |m| m.free_margin)
    }

    fn info(&self, symbol: &str) -> Result<&SymbolInfo, BookError> {
        self.symbol_info
            .get(symbol)
            .ok_or_else(|| BookError::UnknownSymbol { symbol: symbol.to_string() })
    }

    fn margin_state(&self, margins: BTreeMap<String, f64>, holdings: &BTreeMap<String, f64>, total: f64) -> MarginState {
        let used: f64 = margins.values().sum();
        MarginState {
            total_notional: holdings.values().map(|v| v.abs()).sum(),
            margins,
            free_margin: total - used,
        }
    }
}

impl Book for MarginBook {
    fn name(&self) -> &str {
        "margin"
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    fn total_equity(&self) -> f64 {
        self.current.total
    }

    fn symbol_info(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbol_info.get(symbol)
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn update_timeindex(&mut self, prices: &dyn PriceHandler) -> Result<(), BookError> {
        let datetime = prices.latest_bar_datetime()?;
        let previous_margins = self
            .current
            .margin
            .as_ref()
            .map(|m| m.margins.clone())
            .unwrap_or_default();

        let mut holdings = BTreeMap::new();
        let mut margins = BTreeMap::new();
        for symbol in &self.symbols {
            let info = self.info(symbol)?;
            let position = self.positions[symbol];
            let close = prices.latest_bar_value(symbol, BarField::Close)?;
            if close.is_finite() && close > 0.0 {
                holdings.insert(symbol.clone(), info.notional(close, position));
                margins.insert(symbol.clone(), info.margin(close, position));
            } else {
                let carried = self.current.holdings.get(symbol).copied().unwrap_or(0.0);
                holdings.insert(symbol.clone(), carried);
                margins.insert(symbol.clone(), previous_margins.get(symbol).copied().unwrap_or(0.0));
            }
        }

        let cash = self.current.cash;
        let total = cash + holdings.values().sum::<f64>();
        let margin = self.margin_state(margins, &holdings, total);
        let snapshot = HoldingsSnapshot {
            datetime: Some(datetime),
            holdings,
            cash,
            commission: self.current.commission,
            total,
            margin: Some(margin),
        };
        self.current = snapshot.clone();
        self.reserved.clear();
        self.ledger.record_mark(
            PositionSnapshot { datetime: Some(datetime), positions: self.positions.clone() },
            snapshot,
        );
        Ok(())
    }

    fn update_fill(&mut self, fill: &FillEvent) -> Result<(), BookError> {
        if !fill.fill_cost.is_finite() || fill.fill_cost <= 0.0 {
            return Err(BookError::InvalidFill {
                symbol: fill.symbol.clone(),
                reason: format!("fill price {}", fill.fill_cost),
            });
        }
        let info = *self.info(&fill.symbol)?;
        let position = {
            let position = self.positions.entry(fill.symbol.clone()).or_insert(0.0);
            *position += fill.signed_quantity();
            *position
        };
        let cost = info.notional(fill.fill_cost, fill.signed_quantity());

        *self.current.holdings.entry(fill.symbol.clone()).or_insert(0.0) += cost;
        self.current.cash -= cost + fill.commission;
        self.current.commission += fill.commission;
        self.current.total -= fill.commission;

        let mut margins = self
            .current
            .margin
            .take()
            .map(|m| m.margins)
            .unwrap_or_default();
        margins.insert(fill.symbol.clone(), info.margin(fill.fill_cost, position));
        let margin = self.margin_state(margins, &self.current.holdings, self.current.total);
        if margin.free_margin < 0.0 {
            warn!(
                symbol = %fill.symbol,
                free_margin = margin.free_margin,
                used = margin.used(),
                "free margin negative after fill"
            );
        }
        self.current.margin = Some(margin);
        self.reserved.remove(&fill.symbol);

        info!(
            symbol = %fill.symbol,
            side = ?fill.direction,
            quantity = fill.quantity,
            price = fill.fill_cost,
            commission = fill.commission,
            position,
            "fill applied"
        );
        self.ledger.record_trade(TradeRecord {
            timestamp: fill.datetime,
            symbol: fill.symbol.clone(),
            quantity: fill.quantity,
            direction: fill.direction,
            price: fill.fill_cost,
            commission: fill.commission,
            lot_id: fill.lot_id,
        });
        Ok(())
    }

    fn check_order(&mut self, order: &OrderEvent, prices: &dyn PriceHandler) -> Result<(), BookError> {
        if reduces_exposure(order, self.position(&order.symbol)) {
            return Ok(());
        }
        let info = *self.info(&order.symbol)?;
        let close = prices.latest_bar_value(&order.symbol, BarField::Close)?;
        if !(close.is_finite() && close > 0.0) {
            return Err(BookError::PriceUnavailable { symbol: order.symbol.clone() });
        }

        let required = info.margin(close, order.quantity);
        let free = self.free_margin() - self.reserved.values().sum::<f64>();
        if required > free {
            return Err(BookError::InsufficientMargin {
                symbol: order.symbol.clone(),
                required,
                free,
            });
        }
        *self.reserved.entry(order.symbol.clone()).or_insert(0.0) += required;
        Ok(())
    }
}
