//! Criterion benchmarks for zeta hot paths.
//!
//! Benchmarks:
//! 1. Full backtest session (MA crossover over an equity book)
//! 2. Pad alignment of symbols on staggered calendars
//! 3. Book mark-to-market per time index

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use zeta_core::book::{Book, EquityBook};
use zeta_core::domain::Bar;
use zeta_core::event::EventQueue;
use zeta_core::execution::{CommissionModel, FillTiming, SimulatedExecution};
use zeta_core::price::{align_pad, Frequency, HistoricPriceHandler, PriceHandler};
use zeta_core::sizing::SizingPolicy;
use zeta_core::strategy::MaCrossover;
use zeta_core::{Portfolio, TradingSession};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(symbol: &str, n: usize, skip_every: usize) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2015, 1, 2).unwrap();
    (0..n)
        .filter(|i| skip_every == 0 || i % skip_every != 0)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            Bar {
                symbol: symbol.into(),
                datetime: (base_date + chrono::Duration::days(i as i64)).and_hms_opt(0, 0, 0).unwrap(),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                adj_close: close,
                volume: 1_000_000,
            }
        })
        .collect()
}

fn universe(symbols: usize, n: usize) -> (Vec<String>, BTreeMap<String, Vec<Bar>>) {
    let names: Vec<String> = (0..symbols).map(|i| format!("SYM{i}")).collect();
    let bars = names
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), make_bars(s, n, i * 7)))
        .collect();
    (names, bars)
}

// ── 1. Session ───────────────────────────────────────────────────────

fn bench_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("session");
    for n in [1_000usize, 5_000] {
        let (symbols, bars) = universe(4, n);
        let prices = HistoricPriceHandler::from_bars(&symbols, &bars, Frequency::Daily).unwrap();
        group.bench_with_input(BenchmarkId::new("ma_crossover", n), &prices, |b, prices| {
            b.iter(|| {
                let mut session = TradingSession::new(
                    prices.clone(),
                    MaCrossover::new(10, 50, 0.2, SizingPolicy::PercentEquity).unwrap(),
                    Portfolio::new(EquityBook::new(symbols.clone(), 1_000_000.0), 1.0),
                    SimulatedExecution::new(FillTiming::NextOpen, CommissionModel::InteractiveBrokers),
                    EventQueue::new(),
                );
                black_box(session.run().unwrap())
            })
        });
    }
    group.finish();
}

// ── 2. Alignment ─────────────────────────────────────────────────────

fn bench_align(c: &mut Criterion) {
    let (symbols, bars) = universe(10, 2_500);
    c.bench_function("align_pad_10x2500", |b| {
        b.iter(|| black_box(align_pad(black_box(&symbols), black_box(&bars)).unwrap()))
    });
}

// ── 3. Mark-to-market ────────────────────────────────────────────────

fn bench_mark(c: &mut Criterion) {
    let (symbols, bars) = universe(10, 2_500);
    let prices = HistoricPriceHandler::from_bars(&symbols, &bars, Frequency::Daily).unwrap();
    c.bench_function("equity_book_mark_2500", |b| {
        b.iter(|| {
            let mut prices = prices.clone();
            let mut book = EquityBook::new(symbols.clone(), 1_000_000.0);
            let mut queue = EventQueue::new();
            loop {
                prices.update_bars(&mut queue).unwrap();
                if !prices.continue_backtest() {
                    break;
                }
                book.update_timeindex(&prices).unwrap();
            }
            queue.clear();
            black_box(book.total_equity())
        })
    });
}

criterion_group!(benches, bench_session, bench_align, bench_mark);
criterion_main!(benches);
