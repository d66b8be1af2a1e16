//! Parameter optimisation — one backtest per point of a cartesian grid.
//!
//! Prices are loaded once and shared; every run clones its own handler, so
//! runs are independent and execute in parallel.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{OptimizeConfig, SessionConfig};
use crate::data_loader::{load_prices, LoadedData};
use crate::metrics::PerformanceMetrics;
use crate::runner::{run_backtest_from_data, RunError, SessionHooks};

/// One grid point and how it performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRow {
    pub params: BTreeMap<String, f64>,
    pub run_id: String,
    /// `None` when the run failed; `error` says why.
    pub metrics: Option<PerformanceMetrics>,
    pub error: Option<String>,
}

/// Every combination of the grid's values, in key order.
pub fn parameter_grid(optimize: &OptimizeConfig) -> Vec<BTreeMap<String, f64>> {
    let mut grid = vec![BTreeMap::new()];
    for (name, values) in &optimize.params {
        grid = grid
            .into_iter()
            .flat_map(|point| {
                values.iter().map(move |&value| {
                    let mut next = point.clone();
                    next.insert(name.clone(), value);
                    next
                })
            })
            .collect();
    }
    grid
}

/// Config for one grid point.
pub fn config_for(base: &SessionConfig, point: &BTreeMap<String, f64>) -> Result<SessionConfig, RunError> {
    let mut config = base.clone();
    for (name, &value) in point {
        config.strategy = config.strategy.with_param(name, value)?;
    }
    config.optimize = None;
    Ok(config)
}

pub fn optimize(config: &SessionConfig) -> Result<Vec<OptimizationRow>, RunError> {
    let loaded = load_prices(config)?;
    optimize_from_data(config, &loaded)
}

/// Rows come back in grid order. A grid point whose strategy cannot be
/// built (e.g. `fast >= slow`) is reported as a failed row, not an error.
pub fn optimize_from_data(config: &SessionConfig, loaded: &LoadedData) -> Result<Vec<OptimizationRow>, RunError> {
    let grid = parameter_grid(config.optimize()?);
    info!(points = grid.len(), "optimisation started");

    let rows: Vec<OptimizationRow> = grid
        .into_par_iter()
        .map(|point| {
            let outcome = config_for(config, &point)
                .and_then(|run_config| run_backtest_from_data(&run_config, loaded, SessionHooks::default()));
            match outcome {
                Ok(result) => OptimizationRow {
                    params: point,
                    run_id: result.run_id,
                    metrics: Some(result.metrics),
                    error: None,
                },
                Err(e) => {
                    warn!(params = ?point, error = %e, "grid point failed");
                    OptimizationRow { params: point, run_id: String::new(), metrics: None, error: Some(e.to_string()) }
                }
            }
        })
        .collect();

    info!(
        points = rows.len(),
        failed = rows.iter().filter(|r| r.error.is_some()).count(),
        "optimisation finished"
    );
    Ok(rows)
}

/// Table of `{params…, metrics…}`, one row per grid point.
pub fn export_optimization_csv(rows: &[OptimizationRow]) -> anyhow::Result<String> {
    use anyhow::Context;

    let names: Vec<&String> = rows.first().map(|r| r.params.keys().collect()).unwrap_or_default();
    let mut wtr = csv::Writer::from_writer(vec![]);
    let mut header: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
    header.extend([
        "final_equity",
        "total_return",
        "cagr",
        "sharpe",
        "max_drawdown",
        "max_drawdown_duration",
        "trade_count",
        "total_commission",
        "error",
    ]);
    wtr.write_record(&header)?;

    for row in rows {
        let mut record: Vec<String> = names.iter().map(|n| row.params[*n].to_string()).collect();
        match &row.metrics {
            Some(m) => record.extend([
                format!("{:.2}", m.final_equity),
                format!("{:.6}", m.total_return),
                format!("{:.6}", m.cagr),
                format!("{:.4}", m.sharpe),
                format!("{:.6}", m.max_drawdown),
                m.max_drawdown_duration.to_string(),
                m.trade_count.to_string(),
                format!("{:.2}", m.total_commission),
                String::new(),
            ]),
            None => {
                record.extend(std::iter::repeat(String::new()).take(8));
                record.push(row.error.clone().unwrap_or_default());
            }
        }
        wtr.write_record(&record)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}
