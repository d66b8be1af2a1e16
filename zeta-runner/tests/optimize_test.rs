//! Integration tests for grid optimisation.
//!
//! Tests:
//! 1. One row per grid point, in grid order, with invalid points reported
//! 2. Each row matches a standalone backtest of the same parameters
//! 3. The CSV table carries parameter and metric columns
//! 4. A config without an [optimize] section is refused

use zeta_runner::config::ConfigError;
use zeta_runner::optimize::{config_for, export_optimization_csv, optimize_from_data};
use zeta_runner::{load_prices, optimize, run_backtest_from_data, RunError, SessionConfig, SessionHooks};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn config(grid: &str) -> SessionConfig {
    SessionConfig::from_toml_str(&format!(
        r#"
        [session]
        name = "grid"
        start = "2023-01-01"
        end = "2023-12-31"
        symbols = ["AAA"]
        initial_capital = 10000.0

        [data]
        type = "SYNTHETIC"
        seed = 5

        [execution]
        commission = {{ type = "PER_TRADE", amount = 1.0 }}

        [strategy]
        type = "MA_CROSSOVER"
        fast = 5
        slow = 20
        strength = 0.5
        sizing = {{ method = "percent_equity" }}

        {grid}
        "#
    ))
    .unwrap()
}

const GRID: &str = r#"
    [optimize.params]
    fast = [5.0, 10.0]
    slow = [5.0, 30.0]
"#;

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn grid_rows_follow_grid_order_and_report_invalid_points() {
    let rows = optimize(&config(GRID)).unwrap();
    let points: Vec<(f64, f64)> = rows.iter().map(|r| (r.params["fast"], r.params["slow"])).collect();
    assert_eq!(points, vec![(5.0, 5.0), (5.0, 30.0), (10.0, 5.0), (10.0, 30.0)]);

    // fast must stay below slow
    assert!(rows[0].metrics.is_none() && rows[0].error.is_some());
    assert!(rows[2].metrics.is_none() && rows[2].error.is_some());
    assert!(rows[1].metrics.is_some() && rows[1].error.is_none());
    assert!(rows[3].metrics.is_some() && rows[3].error.is_none());
    assert_ne!(rows[1].run_id, rows[3].run_id);
}

#[test]
fn rows_match_standalone_backtests() {
    let base = config(GRID);
    let loaded = load_prices(&base).unwrap();
    let rows = optimize_from_data(&base, &loaded).unwrap();

    for row in rows.iter().filter(|r| r.metrics.is_some()) {
        let single = config_for(&base, &row.params).unwrap();
        let result = run_backtest_from_data(&single, &loaded, SessionHooks::default()).unwrap();
        assert_eq!(Some(&result.metrics), row.metrics.as_ref());
        assert_eq!(result.run_id, row.run_id);
    }
}

#[test]
fn csv_table_has_param_and_metric_columns() {
    let rows = optimize(&config(GRID)).unwrap();
    let csv = export_optimization_csv(&rows).unwrap();
    let mut lines = csv.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("fast,slow,final_equity,total_return,cagr,sharpe,max_drawdown"));
    assert!(header.ends_with("error"));
    assert_eq!(lines.count(), 4);
}

#[test]
fn missing_optimize_section_is_refused() {
    assert!(matches!(
        optimize(&config("")),
        Err(RunError::Config(ConfigError::MissingSection("optimize")))
    ));
}
