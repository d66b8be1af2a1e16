//! Criterion benchmarks for runner hot paths.
//!
//! Run with: `cargo bench -p zeta-runner`
//!
//! Benchmarks:
//! 1. Grid optimisation over pre-loaded synthetic prices
//! 2. Metrics over a long equity series

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use zeta_runner::metrics::{returns, sharpe_ratio, max_drawdown, TRADING_DAYS};
use zeta_runner::optimize::optimize_from_data;
use zeta_runner::{load_prices, SessionConfig};

fn config(points: usize) -> SessionConfig {
    let slows: Vec<String> = (0..points).map(|i| format!("{}.0", 30 + 10 * i)).collect();
    SessionConfig::from_toml_str(&format!(
        r#"
        [session]
        name = "bench"
        start = "2015-01-01"
        end = "2019-12-31"
        symbols = ["AAA", "BBB"]
        initial_capital = 100000.0

        [data]
        type = "SYNTHETIC"
        seed = 1

        [strategy]
        type = "MA_CROSSOVER"
        fast = 10
        slow = 30
        strength = 0.25
        sizing = {{ method = "percent_equity" }}

        [optimize.params]
        slow = [{}]
        "#,
        slows.join(", ")
    ))
    .unwrap()
}

// ── 1. Grid ──────────────────────────────────────────────────────────

fn bench_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    group.sample_size(10);
    for points in [4usize, 16] {
        let config = config(points);
        let loaded = load_prices(&config).unwrap();
        group.bench_with_input(BenchmarkId::new("ma_slow_grid", points), &loaded, |b, loaded| {
            b.iter(|| black_box(optimize_from_data(&config, loaded).unwrap()))
        });
    }
    group.finish();
}

// ── 2. Metrics ───────────────────────────────────────────────────────

fn bench_metrics(c: &mut Criterion) {
    let totals: Vec<f64> = (0..10_000).map(|i| 100_000.0 + (i as f64 * 0.01).sin() * 5_000.0).collect();
    c.bench_function("sharpe_and_drawdown_10000", |b| {
        b.iter(|| {
            let r = returns(black_box(&totals));
            black_box((sharpe_ratio(&r, TRADING_DAYS), max_drawdown(&totals)))
        })
    });
}

criterion_group!(benches, bench_grid, bench_metrics);
criterion_main!(benches);
