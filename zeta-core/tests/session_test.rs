//! Integration tests for the trading session loop.
//!
//! Tests:
//! 1. Buy-and-hold fills at the next open and marks every bar
//! 2. Current-close timing fills at the signal bar's close
//! 3. Signals never act before the bar they were generated on
//! 4. Accounting identity holds on every snapshot of a crossover run
//! 5. A sizing configuration error halts the session
//! 6. The stop flag ends the loop but still produces and sinks a report
//! 7. Orders left at the last bar are reported as dropped
//! 8. A symbol without a bar yet turns its signal into a rejection, not a halt
//! 9. A next-open fill on a split date is not split again
//! 10. Shares bought at the ex-date open get no dividend; shares held before do

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use zeta_core::book::{Book, EquityBook};
use zeta_core::domain::{Bar, CorporateAction};
use zeta_core::event::{EventQueue, MarketEvent, SignalDirection, SignalEvent};
use zeta_core::execution::{CommissionModel, FillTiming, SimulatedExecution};
use zeta_core::price::{Frequency, HistoricPriceHandler, PriceHandler};
use zeta_core::session::{ReportSink, SessionError, SessionReport, TradingSession};
use zeta_core::sizing::{SizingError, SizingPolicy};
use zeta_core::strategy::{BuyAndHold, MaCrossover, Strategy, StrategyError};
use zeta_core::{Portfolio, PortfolioError};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn at(i: usize) -> NaiveDateTime {
    (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Bars whose open sits 0.5 below the close.
fn feed(closes: &[f64]) -> HistoricPriceHandler {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            symbol: "AAA".into(),
            datetime: at(i),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            adj_close: close,
            volume: 1_000,
        })
        .collect();
    let mut map = BTreeMap::new();
    map.insert("AAA".to_string(), bars);
    HistoricPriceHandler::from_bars(&["AAA".into()], &map, Frequency::Daily).unwrap()
}

fn session<S: Strategy>(
    closes: &[f64],
    strategy: S,
    timing: FillTiming,
) -> TradingSession<HistoricPriceHandler, S, EquityBook, SimulatedExecution> {
    TradingSession::new(
        feed(closes),
        strategy,
        Portfolio::new(EquityBook::new(vec!["AAA".into()], 100_000.0), 1.0),
        SimulatedExecution::new(timing, CommissionModel::None),
        EventQueue::new(),
    )
}

/// Emits one LONG on a fixed bar index.
struct LongOnBar {
    bar: usize,
    seen: usize,
}

impl Strategy for LongOnBar {
    fn name(&self) -> &str {
        "long_on_bar"
    }

    fn calculate_signals(
        &mut self,
        market: &MarketEvent,
        _prices: &dyn PriceHandler,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        let fire = self.seen == self.bar;
        self.seen += 1;
        Ok(if fire {
            vec![SignalEvent {
                strategy_id: self.name().into(),
                symbol: "AAA".into(),
                datetime: market.datetime,
                direction: SignalDirection::Long,
                strength: 10.0,
                sizing: SizingPolicy::Naive,
            }]
        } else {
            Vec::new()
        })
    }
}

/// Bars with open equal to close, starting `offset` days in.
fn flat_bars(symbol: &str, offset: usize, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            symbol: symbol.into(),
            datetime: at(offset + i),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 1_000,
        })
        .collect()
}

fn run_with_action(
    closes: &[f64],
    action: CorporateAction,
    timing: FillTiming,
) -> SessionReport {
    let mut map = BTreeMap::new();
    map.insert("AAA".to_string(), flat_bars("AAA", 0, closes));
    let prices = HistoricPriceHandler::from_bars(&["AAA".into()], &map, Frequency::Daily)
        .unwrap()
        .with_corporate_actions("AAA", [action]);
    TradingSession::new(
        prices,
        BuyAndHold::new(100.0, SizingPolicy::Naive),
        Portfolio::new(EquityBook::new(vec!["AAA".into()], 100_000.0), 1.0),
        SimulatedExecution::new(timing, CommissionModel::None),
        EventQueue::new(),
    )
    .run()
    .unwrap()
}

/// Goes long a fixed dollar amount in every symbol on every bar.
struct LongEverySymbol;

impl Strategy for LongEverySymbol {
    fn name(&self) -> &str {
        "long_every_symbol"
    }

    fn calculate_signals(
        &mut self,
        market: &MarketEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        Ok(prices
            .symbols()
            .iter()
            .map(|symbol| SignalEvent {
                strategy_id: self.name().into(),
                symbol: symbol.clone(),
                datetime: market.datetime,
                direction: SignalDirection::Long,
                strength: 1_000.0,
                sizing: SizingPolicy::DollarAmount,
            })
            .collect())
    }
}

#[derive(Clone, Default)]
struct CaptureSink(Arc<Mutex<Option<SessionReport>>>);

impl ReportSink for CaptureSink {
    fn write(&mut self, report: &SessionReport) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        *self.0.lock().unwrap() = Some(report.clone());
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn buy_and_hold_fills_at_next_open() {
    let closes = [100.0, 103.5, 104.0, 105.0];
    let mut session = session(&closes, BuyAndHold::new(100.0, SizingPolicy::Naive), FillTiming::NextOpen);
    let report = session.run().unwrap();

    assert_eq!(report.stats.ticks, 4);
    assert_eq!(report.stats.fills, 1);
    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].price, 103.0);
    assert_eq!(report.trades[0].quantity, 100.0);
    // opening snapshot + one per bar
    assert_eq!(report.holdings.len(), 5);

    let last = report.holdings.last().unwrap();
    assert_eq!(last.holdings["AAA"], 10_500.0);
    assert!((last.total - (100_000.0 + 100.0 * (105.0 - 103.0))).abs() < 1e-9);
}

#[test]
fn current_close_fills_at_signal_bar_close() {
    let mut session = session(&[99.8, 101.0], BuyAndHold::new(100.0, SizingPolicy::Naive), FillTiming::CurrentClose);
    let report = session.run().unwrap();
    assert_eq!(report.trades[0].price, 99.8);
    assert_eq!(report.trades[0].timestamp, at(0));
}

#[test]
fn signal_acts_no_earlier_than_next_open() {
    let closes = [10.0, 11.0, 12.0, 13.0, 14.0];
    let mut session = session(&closes, LongOnBar { bar: 2, seen: 0 }, FillTiming::NextOpen);
    let report = session.run().unwrap();

    assert_eq!(report.trades.len(), 1);
    // signal on bar 2 (close 12.0) fills at bar 3's open
    assert_eq!(report.trades[0].price, 12.5);
    // the bar-2 snapshot is marked before the fill lands
    let positions: Vec<f64> = report.positions.iter().map(|p| p.positions["AAA"]).collect();
    assert_eq!(positions, vec![0.0, 0.0, 0.0, 0.0, 10.0, 10.0]);
}

#[test]
fn crossover_run_keeps_accounting_identity() {
    let closes: Vec<f64> = (0..120)
        .map(|i| 100.0 + 10.0 * ((i as f64) / 9.0).sin() + i as f64 * 0.05)
        .collect();
    let strategy = MaCrossover::new(5, 20, 0.5, SizingPolicy::PercentEquity).unwrap();
    let mut session = TradingSession::new(
        feed(&closes),
        strategy,
        Portfolio::new(EquityBook::new(vec!["AAA".into()], 100_000.0), 1.0),
        SimulatedExecution::new(FillTiming::NextOpen, CommissionModel::InteractiveBrokers),
        EventQueue::new(),
    );
    let report = session.run().unwrap();

    assert!(report.trades.len() >= 2, "expected at least one round trip");
    for snapshot in &report.holdings {
        assert!(snapshot.identity_gap().abs() < 1e-6, "gap at {:?}", snapshot.datetime);
    }
    let commission: f64 = report.trades.iter().map(|t| t.commission).sum();
    assert!((report.holdings.last().unwrap().commission - commission).abs() < 1e-9);
    for position in &report.positions {
        assert!(position.positions["AAA"] >= 0.0);
    }
}

#[test]
fn sizing_configuration_error_halts() {
    let mut session = session(
        &[10.0, 11.0, 12.0],
        BuyAndHold::new(0.5, SizingPolicy::PercentTotalEquity),
        FillTiming::NextOpen,
    );
    let err = session.run().unwrap_err();
    assert!(matches!(
        err,
        SessionError::Portfolio(PortfolioError::Sizing(SizingError::MissingSymbolInfo { .. }))
    ));
    assert_eq!(session.stats().ticks, 1);
    assert!(session.portfolio().book().ledger().trades().is_empty());
}

#[test]
fn stop_flag_still_sinks_report() {
    let sink = CaptureSink::default();
    let captured = sink.0.clone();
    let mut session = session(&[10.0, 11.0], BuyAndHold::new(1.0, SizingPolicy::Naive), FillTiming::NextOpen)
        .with_stop_flag(Arc::new(AtomicBool::new(true)))
        .with_sink(Box::new(sink));

    let report = session.run().unwrap();
    assert_eq!(report.stats.ticks, 0);
    assert_eq!(report.holdings.len(), 1);
    let sunk = captured.lock().unwrap().take().unwrap();
    assert_eq!(sunk.holdings, report.holdings);
}

#[test]
fn order_on_last_bar_is_dropped() {
    let mut session = session(&[10.0, 11.0, 12.0], LongOnBar { bar: 2, seen: 0 }, FillTiming::NextOpen);
    let report = session.run().unwrap();
    assert!(report.trades.is_empty());
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].order.quantity, 10.0);
    assert_eq!(report.stats.orders, 1);
}

#[test]
fn late_listing_signal_is_rejected_and_session_continues() {
    let symbols = vec!["AAA".to_string(), "BBB".to_string()];
    let mut map = BTreeMap::new();
    map.insert("AAA".to_string(), flat_bars("AAA", 0, &[10.0, 10.0, 10.0]));
    map.insert("BBB".to_string(), flat_bars("BBB", 1, &[20.0, 20.0]));
    let prices = HistoricPriceHandler::from_bars(&symbols, &map, Frequency::Daily).unwrap();

    let mut session = TradingSession::new(
        prices,
        LongEverySymbol,
        Portfolio::new(EquityBook::new(symbols, 100_000.0), 1.0),
        SimulatedExecution::new(FillTiming::NextOpen, CommissionModel::None),
        EventQueue::new(),
    );
    let report = session.run().unwrap();

    assert_eq!(report.stats.ticks, 3);
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].symbol, "BBB");
    assert_eq!(report.rejections[0].datetime, at(0));
    assert_eq!(report.stats.rejections, 1);

    // AAA fills on day 1, BBB once it has a bar to size against
    let traded: Vec<(&str, f64)> = report.trades.iter().map(|t| (t.symbol.as_str(), t.quantity)).collect();
    assert_eq!(traded, vec![("AAA", 100.0), ("BBB", 50.0)]);
    for snapshot in &report.holdings {
        assert!(snapshot.identity_gap().abs() < 1e-6);
    }
}

#[test]
fn next_open_fill_on_split_date_is_not_split_again() {
    let split = CorporateAction { date: at(1).date(), split_ratio: 2.0, dividend: 0.0 };
    let report = run_with_action(&[100.0, 50.0, 50.0], split, FillTiming::NextOpen);

    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].price, 50.0);
    assert_eq!(report.trades[0].timestamp, at(1));
    assert_eq!(report.positions.last().unwrap().positions["AAA"], 100.0);
    let totals: Vec<f64> = report.holdings.iter().map(|h| h.total).collect();
    assert_eq!(totals, vec![100_000.0; 4]);
}

#[test]
fn ex_date_dividend_goes_to_shares_held_before_the_open() {
    let dividend = CorporateAction { date: at(1).date(), split_ratio: 1.0, dividend: 1.0 };

    // bought at the ex-date open
    let report = run_with_action(&[10.0, 10.0, 10.0], dividend, FillTiming::NextOpen);
    assert_eq!(report.holdings.last().unwrap().total, 100_000.0);

    // bought at the previous close
    let report = run_with_action(&[10.0, 10.0, 10.0], dividend, FillTiming::CurrentClose);
    assert_eq!(report.trades[0].timestamp, at(0));
    assert_eq!(report.holdings.last().unwrap().total, 100_100.0);
}
