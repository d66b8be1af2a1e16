//! Ledger — append-only history of position and holdings snapshots.
//!
//! Books produce a fresh snapshot per time index and hand it to the ledger;
//! recorded snapshots are never mutated afterwards. The one exception is a
//! second mark at the same datetime, which replaces the previous one.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::OrderSide;

/// Signed quantity held per symbol at a time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// `None` for the opening snapshot taken before the first bar.
    pub datetime: Option<NaiveDateTime>,
    pub positions: BTreeMap<String, f64>,
}

/// Margin state attached to holdings of leveraged books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginState {
    pub total_notional: f64,
    pub margins: BTreeMap<String, f64>,
    pub free_margin: f64,
}

impl MarginState {
    pub fn used(&self) -> f64 {
        self.margins.values().sum()
    }
}

/// Market value per symbol plus cash, cumulative commission and total equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsSnapshot {
    pub datetime: Option<NaiveDateTime>,
    pub holdings: BTreeMap<String, f64>,
    pub cash: f64,
    pub commission: f64,
    pub total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<MarginState>,
}

impl HoldingsSnapshot {
    /// Opening snapshot: all cash, zero market value.
    pub fn opening(symbols: &[String], initial_capital: f64) -> Self {
        Self {
            datetime: None,
            holdings: symbols.iter().map(|s| (s.clone(), 0.0)).collect(),
            cash: initial_capital,
            commission: 0.0,
            total: initial_capital,
            margin: None,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.holdings.values().sum()
    }

    /// `total - (cash + Σ holdings)`; zero for a consistent snapshot.
    pub fn identity_gap(&self) -> f64 {
        self.total - (self.cash + self.market_value())
    }
}

/// One fill as recorded in the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub quantity: f64,
    pub direction: OrderSide,
    pub price: f64,
    pub commission: f64,
    #[serde(default)]
    pub lot_id: u64,
}

impl TradeRecord {
    pub fn signed_quantity(&self) -> f64 {
        self.direction.sign() * self.quantity
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    positions: Vec<PositionSnapshot>,
    holdings: Vec<HoldingsSnapshot>,
    trades: Vec<TradeRecord>,
}

impl Ledger {
    pub fn new(opening_positions: PositionSnapshot, opening_holdings: HoldingsSnapshot) -> Self {
        Self {
            positions: vec![opening_positions],
            holdings: vec![opening_holdings],
            trades: Vec::new(),
        }
    }

    /// Append a mark-to-market pair, replacing the last pair if it carries
    /// the same datetime.
    pub fn record_mark(&mut self, positions: PositionSnapshot, holdings: HoldingsSnapshot) {
        let same_time = holdings.datetime.is_some()
            && self.holdings.last().map(|h| h.datetime) == Some(holdings.datetime);
        if same_time {
            self.positions.pop();
            self.holdings.pop();
        }
        self.positions.push(positions);
        self.holdings.push(holdings);
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    pub fn positions(&self) -> &[PositionSnapshot] {
        &self.positions
    }

    pub fn holdings(&self) -> &[HoldingsSnapshot] {
        &self.holdings
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn last_holdings(&self) -> Option<&HoldingsSnapshot> {
        self.holdings.last()
    }

    pub fn last_positions(&self) -> Option<&PositionSnapshot> {
        self.positions.last()
    }

    /// Net signed quantity per symbol, replayed from the trade log.
    pub fn net_traded(&self) -> BTreeMap<String, f64> {
        let mut net = BTreeMap::new();
        for trade in &self.trades {
            *net.entry(trade.symbol.clone()).or_insert(0.0) += trade.signed_quantity();
        }
        net
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn symbols() -> Vec<String> {
        vec!["AAA".into(), "BBB".into()]
    }

    fn snapshot_at(day: u32, total: f64) -> (PositionSnapshot, HoldingsSnapshot) {
        let mut holdings = HoldingsSnapshot::opening(&symbols(), total);
        holdings.datetime = Some(dt(day));
        let positions = PositionSnapshot {
            datetime: Some(dt(day)),
            positions: symbols().into_iter().map(|s| (s, 0.0)).collect(),
        };
        (positions, holdings)
    }

    fn opening_ledger() -> Ledger {
        Ledger::new(
            PositionSnapshot { datetime: None, positions: BTreeMap::new() },
            HoldingsSnapshot::opening(&symbols(), 1000.0),
        )
    }

    #[test]
    fn opening_snapshot_is_consistent() {
        let snapshot = HoldingsSnapshot::opening(&symbols(), 1000.0);
        assert_eq!(snapshot.identity_gap(), 0.0);
        assert_eq!(snapshot.holdings.len(), 2);
    }

    #[test]
    fn marks_append_in_order() {
        let mut ledger = opening_ledger();
        let (p, h) = snapshot_at(2, 1000.0);
        ledger.record_mark(p, h);
        let (p, h) = snapshot_at(3, 1010.0);
        ledger.record_mark(p, h);
        assert_eq!(ledger.holdings().len(), 3);
        assert_eq!(ledger.positions().len(), 3);
        assert_eq!(ledger.last_holdings().map(|h| h.total), Some(1010.0));
    }

    #[test]
    fn same_datetime_replaces_last_mark() {
        let mut ledger = opening_ledger();
        let (p, h) = snapshot_at(2, 1000.0);
        ledger.record_mark(p, h);
        let (p, h) = snapshot_at(2, 990.0);
        ledger.record_mark(p, h);
        assert_eq!(ledger.holdings().len(), 2);
        assert_eq!(ledger.last_holdings().map(|h| h.total), Some(990.0));
    }

    #[test]
    fn net_traded_replays_fills() {
        let mut ledger = opening_ledger();
        for (qty, side) in [(10.0, OrderSide::Buy), (4.0, OrderSide::Sell), (1.0, OrderSide::Buy)] {
            ledger.record_trade(TradeRecord {
                timestamp: dt(2),
                symbol: "AAA".into(),
                quantity: qty,
                direction: side,
                price: 10.0,
                commission: 0.0,
                lot_id: 0,
            });
        }
        assert_eq!(ledger.net_traded().get("AAA"), Some(&7.0));
    }
}
