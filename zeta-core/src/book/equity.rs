//! EquityBook — unlevered cash account for shares.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Book, BookError};
use crate::domain::{BarField, HoldingsSnapshot, Ledger, PositionSnapshot, TradeRecord};
use crate::event::FillEvent;
use crate::price::{Frequency, PriceHandler};

/// How dividends are booked against signed positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DividendTreatment {
    /// Cash moves by `position × dividend`: longs are credited, shorts debited.
    #[default]
    Signed,
    /// Only long positions are credited; shorts are left to the broker.
    LongOnly,
}

/// Cash book holding whole shares, marked at the latest close.
#[derive(Debug, Clone)]
pub struct EquityBook {
    symbols: Vec<String>,
    initial_capital: f64,
    positions: BTreeMap<String, f64>,
    current: HoldingsSnapshot,
    ledger: Ledger,
    dividends: DividendTreatment,
    last_actions_at: Option<NaiveDateTime>,
    /// Signed quantity filled since the last mark, with the fill datetime.
    unmarked_fills: Vec<(NaiveDateTime, String, f64)>,
}

impl EquityBook {
    pub fn new(symbols: Vec<String>, initial_capital: f64) -> Self {
        let positions: BTreeMap<String, f64> = symbols.iter().map(|s| (s.clone(), 0.0)).collect();
        let current = HoldingsSnapshot::opening(&symbols, initial_capital);
        let ledger = Ledger::new(
            PositionSnapshot { datetime: None, positions: positions.clone() },
            current.clone(),
        );
        Self {
            symbols,
            initial_capital,
            positions,
            current,
            ledger,
            dividends: DividendTreatment::default(),
            last_actions_at: None,
            unmarked_fills: Vec::new(),
        }
    }

    pub fn with_dividends(mut self, dividends: DividendTreatment) -> Self {
        self.dividends = dividends;
        self
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Working holdings row, including fills since the last mark.
    pub fn current_holdings(&self) -> &HoldingsSnapshot {
        &self.current
    }

    /// Quantity filled at or after `datetime`; corporate actions dated then
    /// were already in its fill price.
    fn filled_since(&self, symbol: &str, datetime: NaiveDateTime) -> f64 {
        self.unmarked_fills
            .iter()
            .filter(|(at, s, _)| s == symbol && *at >= datetime)
            .map(|(_, _, quantity)| quantity)
            .sum()
    }

    fn dividend_cash(&self, position: f64, dividend: f64) -> f64 {
        match self.dividends {
            DividendTreatment::Signed => position * dividend,
            DividendTreatment::LongOnly => position.max(0.0) * dividend,
        }
    }
}

impl Book for EquityBook {
    fn name(&self) -> &str {
        "equity"
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

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn update_timeindex(&mut self, prices: &dyn PriceHandler) -> Result<(), BookError> {
        let datetime = prices.latest_bar_datetime()?;
        let apply_actions =
            prices.frequency() == Frequency::Daily && self.last_actions_at != Some(datetime);

        let mut cash = self.current.cash;
        let mut holdings = BTreeMap::new();
        for symbol in &self.symbols {
            let mut position = self.positions[symbol];
            let fresh = if apply_actions { self.filled_since(symbol, datetime) } else { 0.0 };
            let mut entitled = position - fresh;

            if apply_actions {
                let split = prices.latest_bar_split(symbol)?;
                if split.is_finite() && split > 0.0 && split != 1.0 {
                    entitled *= split;
                    debug!(symbol, split, before = position, after = entitled + fresh, "split applied");
                    position = entitled + fresh;
                    self.positions.insert(symbol.clone(), position);
                }
            }

            let close = prices.latest_bar_value(symbol, BarField::Close)?;
            let market_value = if close.is_finite() {
                if apply_actions {
                    let dividend = prices.latest_bar_dividend(symbol)?;
                    if dividend.is_finite() && dividend != 0.0 {
                        let paid = self.dividend_cash(entitled, dividend);
                        debug!(symbol, dividend, paid, "dividend booked");
                        cash += paid;
                    }
                }
                position * close
            } else {
                self.current.holdings.get(symbol).copied().unwrap_or(0.0)
            };
            holdings.insert(symbol.clone(), market_value);
        }
        if apply_actions {
            self.last_actions_at = Some(datetime);
        }
        self.unmarked_fills.retain(|(at, _, _)| *at > datetime);

        let total = cash + holdings.values().sum::<f64>();
        let snapshot = HoldingsSnapshot {
            datetime: Some(datetime),
            holdings,
            cash,
            commission: self.current.commission,
            total,
            margin: None,
        };
        self.current = snapshot.clone();
        self.ledger.record_mark(
            PositionSnapshot { datetime: Some(datetime), positions: self.positions.clone() },
            snapshot,
        );
        Ok(())
    }

    fn update_fill(&mut self, fill: &FillEvent) -> Result<(), BookError> {
        if !fill.fill_cost.is_finite() || !fill.quantity.is_finite() {
            return Err(BookError::InvalidFill {
                symbol: fill.symbol.clone(),
                reason: format!("non-finite price {} or quantity {}", fill.fill_cost, fill.quantity),
            });
        }
        let position = self
            .positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| BookError::UnknownSymbol { symbol: fill.symbol.clone() })?;

        let signed = fill.signed_quantity();
        *position += signed;
        self.unmarked_fills.push((fill.datetime, fill.symbol.clone(), signed));
        let cost = signed * fill.fill_cost;

        *self.current.holdings.entry(fill.symbol.clone()).or_insert(0.0) += cost;
        self.current.cash -= cost + fill.commission;
        self.current.commission += fill.commission;
        self.current.total -= fill.commission;

        info!(
            symbol = %fill.symbol,
            side = ?fill.direction,
            quantity = fill.quantity,
            price = fill.fill_cost,
            commission = fill.commission,
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
}
