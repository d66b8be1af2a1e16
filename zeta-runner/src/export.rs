//! Reporting and export — JSON, CSV and Markdown artifacts.
//!
//! Every run gets its own directory under the output dir:
//! - `manifest.json` — the full `BacktestResult` (backtests only)
//! - `report.json` — the session report
//! - `metrics.json` — summary metrics
//! - `equity.csv` — per-snapshot total, returns, equity curve and drawdown
//! - `holdings.csv` — per-snapshot cash, commission, total and market values
//! - `trades.csv` — the trade log
//! - `rejections.csv` — orders refused before execution
//! - `report.md` — human-readable summary (backtests only)
//!
//! Persisted results carry a `schema_version`; newer versions are rejected
//! on load.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use zeta_core::domain::HoldingsSnapshot;
use zeta_core::{ReportSink, SessionReport};

use crate::metrics::{equity_points, EquityPoint, PerformanceMetrics};
use crate::runner::{BacktestResult, SCHEMA_VERSION};

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult`, rejecting schema versions newer than ours.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV ────────────────────────────────────────────────────────────

fn serialize_rows<T: serde::Serialize>(rows: &[T]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_equity_csv(points: &[EquityPoint]) -> Result<String> {
    serialize_rows(points)
}

/// Columns: `timestamp, symbol, quantity, direction, price, commission, lot_id`.
pub fn export_trades_csv(report: &SessionReport) -> Result<String> {
    if report.trades.is_empty() {
        return Ok("timestamp,symbol,quantity,direction,price,commission,lot_id\n".to_string());
    }
    serialize_rows(&report.trades)
}

pub fn export_rejections_csv(report: &SessionReport) -> Result<String> {
    if report.rejections.is_empty() {
        return Ok("datetime,symbol,direction,side,quantity,price,reason\n".to_string());
    }
    serialize_rows(&report.rejections)
}

/// One row per snapshot with a column per symbol's market value.
pub fn export_holdings_csv(holdings: &[HoldingsSnapshot]) -> Result<String> {
    let symbols: Vec<&String> = holdings.first().map(|h| h.holdings.keys().collect()).unwrap_or_default();
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["datetime", "cash", "commission", "total"];
    header.extend(symbols.iter().map(|s| s.as_str()));
    wtr.write_record(&header)?;

    for h in holdings {
        let mut row = vec![
            h.datetime.map(|d| d.to_string()).unwrap_or_default(),
            format!("{:.2}", h.cash),
            format!("{:.2}", h.commission),
            format!("{:.2}", h.total),
        ];
        row.extend(
            symbols
                .iter()
                .map(|s| format!("{:.2}", h.holdings.get(*s).copied().unwrap_or(0.0))),
        );
        wtr.write_record(&row)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Markdown ───────────────────────────────────────────────────────

pub fn generate_report(result: &BacktestResult) -> String {
    let m = &result.metrics;
    let s = &result.report.stats;
    let mut md = String::with_capacity(1024);

    md.push_str(&format!("# {}\n\n", result.name));
    md.push_str("| Field | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Run | `{}` |\n", result.run_id));
    md.push_str(&format!("| Strategy | {} |\n", result.strategy.kind()));
    md.push_str(&format!("| Book | {} |\n", result.report.book_name));
    md.push_str(&format!("| Symbols | {} |\n", result.symbols.join(", ")));
    md.push_str(&format!("| Period | {} to {} |\n", result.start_date, result.end_date));
    md.push_str(&format!("| Initial Capital | {:.2} |\n", result.initial_capital));
    if !result.synthetic_symbols.is_empty() {
        md.push_str(&format!("| Data | **SYNTHETIC** ({}) |\n", result.synthetic_symbols.join(", ")));
    }

    md.push_str("\n## Performance\n\n| Metric | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Final Equity | {:.2} |\n", m.final_equity));
    md.push_str(&format!("| Total Return | {:.2}% |\n", m.total_return * 100.0));
    md.push_str(&format!("| CAGR | {:.2}% |\n", m.cagr * 100.0));
    md.push_str(&format!("| Sharpe | {:.3} |\n", m.sharpe));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", m.max_drawdown * 100.0));
    md.push_str(&format!("| Drawdown Duration | {} bars |\n", m.max_drawdown_duration));
    md.push_str(&format!("| Trades | {} |\n", m.trade_count));
    md.push_str(&format!("| Commission | {:.2} |\n", m.total_commission));

    md.push_str("\n## Session\n\n| Counter | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Bars | {} |\n", s.ticks));
    md.push_str(&format!("| Signals | {} |\n", s.signals));
    md.push_str(&format!("| Orders | {} |\n", s.orders));
    md.push_str(&format!("| Fills | {} |\n", s.fills));
    md.push_str(&format!("| Rejections | {} |\n", s.rejections));
    md.push_str(&format!("| Dropped | {} |\n", result.report.dropped.len()));
    md
}

// ─── Artifact directories ───────────────────────────────────────────

/// Writes every report-derived file into `dir`.
pub fn write_report_files(report: &SessionReport, periods_per_year: f64, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create artifact dir: {}", dir.display()))?;

    let write = |name: &str, contents: String| -> Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
    };

    let metrics = PerformanceMetrics::from_report(report, periods_per_year);
    write("report.json", serde_json::to_string_pretty(report)?)?;
    write("metrics.json", serde_json::to_string_pretty(&metrics)?)?;
    write("equity.csv", export_equity_csv(&equity_points(&report.holdings))?)?;
    write("holdings.csv", export_holdings_csv(&report.holdings)?)?;
    write("trades.csv", export_trades_csv(report)?)?;
    write("rejections.csv", export_rejections_csv(report)?)?;
    Ok(())
}

/// `{output_dir}/{name}_{first 12 hex digits of the run id}/`.
pub fn run_dir(output_dir: &Path, name: &str, run_id: &str) -> PathBuf {
    let short = run_id.get(..12).unwrap_or(run_id);
    output_dir.join(format!("{name}_{short}"))
}

/// Save the full artifact set for a backtest and return its directory.
pub fn save_artifacts(result: &BacktestResult, periods_per_year: f64, output_dir: &Path) -> Result<PathBuf> {
    let dir = run_dir(output_dir, &result.name, &result.run_id);
    write_report_files(&result.report, periods_per_year, &dir)?;
    std::fs::write(dir.join("manifest.json"), export_json(result)?)?;
    std::fs::write(dir.join("report.md"), generate_report(result))?;
    info!(dir = %dir.display(), "artifacts saved");
    Ok(dir)
}

pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest).with_context(|| format!("failed to read {}", manifest.display()))?;
    import_json(&json)
}

/// Session sink that writes the report files when the loop exits.
pub struct ArtifactSink {
    dir: PathBuf,
    periods_per_year: f64,
}

impl ArtifactSink {
    pub fn new(dir: impl Into<PathBuf>, periods_per_year: f64) -> Self {
        Self { dir: dir.into(), periods_per_year }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportSink for ArtifactSink {
    fn write(&mut self, report: &SessionReport) -> Result<(), Box<dyn StdError + Send + Sync>> {
        write_report_files(report, self.periods_per_year, &self.dir)?;
        info!(dir = %self.dir.display(), "session report written");
        Ok(())
    }
}
