//! LiveBook — a book mirrored from the brokerage account.
//!
//! Positions are rebuilt from the broker's open trades (lots) on every
//! heartbeat. Holdings are the broker's margin requirement per symbol and
//! total equity is the account equity. Exits are routed per lot, because
//! the broker closes trades by ticket.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AccountInfo, BrokerClient, BrokerSymbol, Throttle};
use crate::book::{reduces_exposure, Book, BookError};
use crate::domain::{HoldingsSnapshot, Ledger, MarginState, PositionSnapshot, SymbolInfo, TradeRecord};
use crate::event::{FillEvent, OrderEvent, OrderSide};
use crate::price::PriceHandler;
use crate::sizing::{is_flat, FLAT_EPSILON};

/// One open trade (ticket) in a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: u64,
    pub side: OrderSide,
    pub volume: f64,
    pub open_price: f64,
    pub opened_at: NaiveDateTime,
    pub profit: f64,
}

pub struct LiveBook<C: BrokerClient> {
    client: Arc<C>,
    throttle: Throttle,
    symbols: Vec<String>,
    contracts: BTreeMap<String, BrokerSymbol>,
    symbol_info: BTreeMap<String, SymbolInfo>,
    account: AccountInfo,
    lots: BTreeMap<String, Vec<Lot>>,
    positions: BTreeMap<String, f64>,
    current: HoldingsSnapshot,
    ledger: Ledger,
    reserved_margin: f64,
}

impl<C: BrokerClient> LiveBook<C> {
    /// Load contract specs, account balances and open lots from the broker.
    pub fn connect(client: Arc<C>, symbols: Vec<String>, throttle: Throttle) -> Result<Self, BookError> {
        let mut contracts = BTreeMap::new();
        let mut symbol_info = BTreeMap::new();
        for symbol in &symbols {
            let contract = client.symbol(symbol)?;
            symbol_info.insert(symbol.clone(), contract.symbol_info());
            contracts.insert(symbol.clone(), contract);
            throttle.pause();
        }
        let account = client.account_info()?;
        throttle.pause();

        let mut book = Self {
            client,
            throttle,
            current: HoldingsSnapshot::opening(&symbols, account.equity),
            positions: symbols.iter().map(|s| (s.clone(), 0.0)).collect(),
            lots: BTreeMap::new(),
            symbols,
            contracts,
            symbol_info,
            account,
            ledger: Ledger::default(),
            reserved_margin: 0.0,
        };
        book.refresh_lots()?;
        book.current = book.build_holdings(None)?;
        book.ledger = Ledger::new(
            PositionSnapshot { datetime: None, positions: book.positions.clone() },
            book.current.clone(),
        );
        info!(
            broker = book.client.name(),
            equity = book.account.equity,
            currency = %book.account.currency,
            "live book constructed"
        );
        Ok(book)
    }

    pub fn account(&self) -> &AccountInfo {
        &self.account
    }

    pub fn lots(&self, symbol: &str) -> &[Lot] {
        self.lots.get(symbol).map_or(&[], Vec::as_slice)
    }

    /// Rebuild lots and positions from the broker's open trades. Trades
    /// without a close price are still pending and are skipped.
    fn refresh_lots(&mut self) -> Result<(), BookError> {
        let trades = self.client.open_trades()?;
        let mut lots: BTreeMap<String, Vec<Lot>> =
            self.symbols.iter().map(|s| (s.clone(), Vec::new())).collect();
        for trade in trades {
            if trade.close_price <= 0.0 {
                continue;
            }
            if let Some(symbol_lots) = lots.get_mut(&trade.symbol) {
                symbol_lots.push(Lot {
                    lot_id: trade.lot_id,
                    side: trade.side,
                    volume: trade.volume,
                    open_price: trade.open_price,
                    opened_at: trade.opened_at,
                    profit: trade.profit,
                });
            }
        }
        for symbol_lots in lots.values_mut() {
            symbol_lots.sort_by_key(|l| l.lot_id);
        }
        self.positions = lots
            .iter()
            .map(|(symbol, symbol_lots)| {
                let net = symbol_lots.iter().map(|l| l.side.sign() * l.volume).sum();
                (symbol.clone(), net)
            })
            .collect();
        self.lots = lots;
        Ok(())
    }

    /// Quote-to-account conversion for notional values.
    fn fx_rate(&self, quote_currency: &str) -> f64 {
        if quote_currency == self.account.currency {
            return 1.0;
        }
        let pair = format!("{}{}", self.account.currency, quote_currency);
        match self.client.symbol(&pair) {
            Ok(fx) if fx.mid() > 0.0 => 1.0 / fx.mid(),
            Ok(_) | Err(_) => {
                warn!(pair, "no conversion rate; notional left in quote currency");
                1.0
            }
        }
    }

    fn build_holdings(&self, datetime: Option<NaiveDateTime>) -> Result<HoldingsSnapshot, BookError> {
        let mut holdings = BTreeMap::new();
        let mut total_notional = 0.0;
        for symbol in &self.symbols {
            let volume = self.position(symbol);
            if is_flat(volume) {
                holdings.insert(symbol.clone(), 0.0);
                continue;
            }
            let margin = self.client.margin_requirement(symbol, volume.abs())?;
            self.throttle.pause();
            holdings.insert(symbol.clone(), margin);

            if let Some(contract) = self.contracts.get(symbol) {
                let quote = self.client.symbol(symbol).unwrap_or_else(|_| contract.clone());
                total_notional += (self.fx_rate(&contract.currency_profit)
                    * contract.contract_size
                    * volume
                    * quote.mid())
                .abs();
                self.throttle.pause();
            }
        }

        let used: f64 = holdings.values().sum();
        let equity = self.account.equity;
        Ok(HoldingsSnapshot {
            datetime,
            cash: equity - used,
            commission: self.current.commission,
            total: equity,
            margin: Some(MarginState {
                total_notional,
                margins: holdings.clone(),
                free_margin: equity - self.account.margin,
            }),
            holdings,
        })
    }

    fn contract_info(&self, symbol: &str) -> Result<&SymbolInfo, BookError> {
        self.symbol_info
            .get(symbol)
            .ok_or_else(|| BookError::UnknownSymbol { symbol: symbol.to_string() })
    }

    /// One exit order per open lot of `symbol`.
    pub fn close_position(&self, symbol: &str) -> Vec<OrderEvent> {
        self.lots(symbol)
            .iter()
            .map(|lot| {
                OrderEvent::exit(symbol, lot.volume, lot.side.opposite()).with_lot(lot.lot_id)
            })
            .collect()
    }

    /// Exit orders that take `units` off the position, oldest lot first.
    /// The last lot touched may be closed partially.
    pub fn reduce_position(&self, symbol: &str, units: f64) -> Result<Vec<OrderEvent>, BookError> {
        let position = self.position(symbol);
        let invalid = |reason: String| BookError::InvalidOrder { symbol: symbol.to_string(), reason };
        if is_flat(position) {
            return Err(invalid("cannot reduce a flat position".into()));
        }
        if units.is_nan() || units <= 0.0 || units > position.abs() + FLAT_EPSILON {
            return Err(invalid(format!("cannot reduce position {position} by {units}")));
        }
        let info = self.contract_info(symbol)?;
        let side = OrderSide::closing(position);

        let mut remaining = units;
        let mut orders = Vec::new();
        for lot in self.lots(symbol) {
            if is_flat(remaining) {
                break;
            }
            let quantity = info.round_down(lot.volume.min(remaining));
            remaining -= lot.volume.min(remaining);
            if !is_flat(quantity) {
                orders.push(OrderEvent::exit(symbol, quantity, side).with_lot(lot.lot_id));
            }
        }
        Ok(orders)
    }
}

impl<C: BrokerClient> Book for LiveBook<C> {
    fn name(&self) -> &str {
        "live"
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    fn total_equity(&self) -> f64 {
        self.account.equity
    }

    fn symbol_info(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbol_info.get(symbol)
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn update_timeindex(&mut self, prices: &dyn PriceHandler) -> Result<(), BookError> {
        let datetime = prices
            .latest_bar_datetime()
            .unwrap_or_else(|_| Utc::now().naive_utc());
        self.account = self.client.account_info()?;
        self.throttle.pause();
        self.refresh_lots()?;
        self.throttle.pause();
        let snapshot = self.build_holdings(Some(datetime))?;
        self.current = snapshot.clone();
        self.reserved_margin = 0.0;
        self.ledger.record_mark(
            PositionSnapshot { datetime: Some(datetime), positions: self.positions.clone() },
            snapshot,
        );
        Ok(())
    }

    fn update_fill(&mut self, fill: &FillEvent) -> Result<(), BookError> {
        let position = self
            .positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| BookError::UnknownSymbol { symbol: fill.symbol.clone() })?;
        *position += fill.signed_quantity();
        let position = *position;

        let lots = self.lots.entry(fill.symbol.clone()).or_default();
        match lots.iter_mut().find(|l| fill.lot_id != 0 && l.lot_id == fill.lot_id) {
            Some(lot) if lot.side == fill.direction => lot.volume += fill.quantity,
            Some(lot) => lot.volume -= fill.quantity,
            None if fill.lot_id != 0 => lots.push(Lot {
                lot_id: fill.lot_id,
                side: fill.direction,
                volume: fill.quantity,
                open_price: fill.fill_cost,
                opened_at: fill.datetime,
                profit: 0.0,
            }),
            None => {}
        }
        lots.retain(|l| !is_flat(l.volume));

        self.current.commission += fill.commission;
        info!(
            symbol = %fill.symbol,
            side = ?fill.direction,
            quantity = fill.quantity,
            price = fill.fill_cost,
            lot_id = fill.lot_id,
            position,
            "live fill applied"
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

    /// New exposure must fit in `equity - margin in use`.
    fn check_order(&mut self, order: &OrderEvent, _prices: &dyn PriceHandler) -> Result<(), BookError> {
        if reduces_exposure(order, self.position(&order.symbol)) {
            return Ok(());
        }
        let required = self.client.margin_requirement(&order.symbol, order.quantity)?;
        self.throttle.pause();
        let free = self.account.equity - self.account.margin - self.reserved_margin;
        if required >= free {
            return Err(BookError::InsufficientMargin {
                symbol: order.symbol.clone(),
                required,
                free,
            });
        }
        self.reserved_margin += required;
        Ok(())
    }

    fn route_order(&mut self, order: OrderEvent) -> Result<Vec<OrderEvent>, BookError> {
        let position = self.position(&order.symbol);
        let opposes = !is_flat(position) && order.direction.sign() != position.signum();

        if order.is_exit && order.lot_id != 0 {
            return Ok(vec![order]);
        }
        if order.is_exit || opposes {
            let units = order.quantity.min(position.abs());
            if units + FLAT_EPSILON >= position.abs() {
                return Ok(self.close_position(&order.symbol));
            }
            return self.reduce_position(&order.symbol, units);
        }

        let quantity = self.contract_info(&order.symbol)?.round_down(order.quantity);
        if is_flat(quantity) {
            return Err(BookError::InvalidOrder {
                symbol: order.symbol.clone(),
                reason: format!("{} is below the minimum lot", order.quantity),
            });
        }
        Ok(vec![OrderEvent { quantity, ..order }])
    }
}
