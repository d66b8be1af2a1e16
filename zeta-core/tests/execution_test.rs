//! Integration tests for simulated execution against a historic feed.
//!
//! Tests:
//! 1. Next-open timing fills at the following bar's open; current-close at the close
//! 2. Commission schedules are charged per fill
//! 3. Commission reduces cash and total, never a holding
//! 4. Orders with no fill price are dropped and reported, not errors
//! 5. Limit orders are dropped

use chrono::NaiveDate;
use std::collections::BTreeMap;
use zeta_core::book::{Book, EquityBook};
use zeta_core::domain::Bar;
use zeta_core::event::{EventQueue, OrderEvent, OrderSide, OrderType};
use zeta_core::execution::{CommissionModel, ExecutionHandler, FillTiming, SimulatedExecution, BACKTEST_EXCHANGE};
use zeta_core::price::{Frequency, HistoricPriceHandler, PriceHandler};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

/// Two bars: close 99.8 then open 103.
fn prices() -> HistoricPriceHandler {
    let bar = |day: u32, open: f64, close: f64| Bar {
        symbol: "AAA".into(),
        datetime: NaiveDate::from_ymd_opt(2024, 2, day).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        open,
        high: open.max(close) + 1.0,
        low: open.min(close) - 1.0,
        close,
        adj_close: close,
        volume: 5_000,
    };
    let mut map = BTreeMap::new();
    map.insert("AAA".to_string(), vec![bar(1, 99.0, 99.8), bar(2, 103.0, 104.0)]);
    let mut handler = HistoricPriceHandler::from_bars(&["AAA".into()], &map, Frequency::Daily).unwrap();
    handler.update_bars(&mut EventQueue::new()).unwrap();
    handler
}

fn buy(quantity: f64) -> OrderEvent {
    OrderEvent::market("AAA", quantity, OrderSide::Buy)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn fill_timing_picks_open_or_close() {
    let prices = prices();

    let mut on_open = SimulatedExecution::new(FillTiming::NextOpen, CommissionModel::None);
    let fill = on_open.execute_order(&buy(10.0), &prices).unwrap().unwrap();
    assert_eq!(fill.fill_cost, 103.0);
    assert_eq!(fill.exchange, BACKTEST_EXCHANGE);
    // stamped on the bar it executes on
    assert_eq!(fill.datetime, NaiveDate::from_ymd_opt(2024, 2, 2).unwrap().and_hms_opt(0, 0, 0).unwrap());

    let mut on_close = SimulatedExecution::new(FillTiming::CurrentClose, CommissionModel::None);
    let fill = on_close.execute_order(&buy(10.0), &prices).unwrap().unwrap();
    assert_eq!(fill.fill_cost, 99.8);
}

#[test]
fn commission_schedules_are_charged() {
    let prices = prices();
    let cases = [
        (CommissionModel::InteractiveBrokers, 100.0, 1.3),
        (CommissionModel::InteractiveBrokers, 1_000.0, 8.0),
        (CommissionModel::PerTrade { amount: 5.0 }, 1_000.0, 5.0),
        (CommissionModel::None, 1_000.0, 0.0),
    ];
    for (model, quantity, expected) in cases {
        let mut execution = SimulatedExecution::new(FillTiming::NextOpen, model);
        let fill = execution.execute_order(&buy(quantity), &prices).unwrap().unwrap();
        assert!(
            (fill.commission - expected).abs() < 1e-9,
            "{model:?} on {quantity}: {} != {expected}",
            fill.commission
        );
    }
}

#[test]
fn commission_hits_cash_not_holdings() {
    let prices = prices();
    let mut book = EquityBook::new(vec!["AAA".into()], 10_000.0);
    book.update_timeindex(&prices).unwrap();
    let mut execution = SimulatedExecution::new(FillTiming::NextOpen, CommissionModel::PerTrade { amount: 2.5 });
    let fill = execution.execute_order(&buy(10.0), &prices).unwrap().unwrap();
    book.update_fill(&fill).unwrap();

    let row = book.current_holdings();
    assert_eq!(row.holdings["AAA"], 1_030.0);
    assert_eq!(row.cash, 10_000.0 - 1_030.0 - 2.5);
    assert_eq!(row.total, 10_000.0 - 2.5);
    assert_eq!(row.commission, 2.5);
}

#[test]
fn order_without_next_bar_is_dropped() {
    let mut prices = prices();
    prices.update_bars(&mut EventQueue::new()).unwrap();
    let mut execution = SimulatedExecution::new(FillTiming::NextOpen, CommissionModel::None);

    assert!(execution.execute_order(&buy(1.0), &prices).unwrap().is_none());
    let dropped = execution.dropped_orders();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].order.symbol, "AAA");
    assert_eq!(dropped[0].datetime, Some(prices.latest_bar_datetime().unwrap()));
}

#[test]
fn limit_order_is_dropped() {
    let prices = prices();
    let mut execution = SimulatedExecution::default();
    let order = OrderEvent { order_type: OrderType::Limit, ..buy(1.0) };
    assert!(execution.execute_order(&order, &prices).unwrap().is_none());
    assert!(execution.dropped_orders()[0].reason.contains("limit"));
}
