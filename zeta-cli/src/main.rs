//! Zeta CLI — backtest, optimise and trade live from a TOML session file.
//!
//! Commands:
//! - `run` — one backtest; artifacts go to a per-run directory
//! - `optimize` — grid over strategy parameters; writes `optimization.csv`
//! - `live` — trade an XTB account until the configured deadline
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Ctrl-C stops the
//! session after the current tick and still writes its report.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zeta_core::price::Frequency;
use zeta_core::ReportSink;
use zeta_runner::export::{run_dir, save_artifacts, ArtifactSink};
use zeta_runner::metrics::periods_per_year;
use zeta_runner::optimize::export_optimization_csv;
use zeta_runner::{optimize, run_backtest, run_live, BacktestResult, SessionConfig, SessionHooks};

#[derive(Parser)]
#[command(name = "zeta", about = "Zeta — event-driven backtest and live trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest from a session file.
    Run {
        /// Path to the TOML session file.
        #[arg(long)]
        config: PathBuf,

        /// Overrides `[output] dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run a backtest per point of the `[optimize]` grid.
    Optimize {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Trade live until the `[live]` deadline.
    Live {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, output_dir } => run_cmd(&config, output_dir),
        Commands::Optimize { config, output_dir } => optimize_cmd(&config, output_dir),
        Commands::Live { config, output_dir } => live_cmd(&config, output_dir),
    }
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    SessionConfig::from_path(path).with_context(|| format!("failed to load session file {}", path.display()))
}

fn output_root(config: &SessionConfig, overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| config.output.dir.clone())
}

/// Raised by Ctrl-C; the session checks it between ticks.
fn stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("received shutdown signal");
        handler_flag.store(true, Ordering::Release);
    }) {
        warn!("failed to set Ctrl-C handler: {e}; the session runs to completion");
    }
    stop
}

fn run_cmd(path: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(path)?;
    let hooks = SessionHooks { stop: Some(stop_flag()), sink: None };
    let result = run_backtest(&config, hooks).context("backtest failed")?;

    let periods = periods_per_year(config.session.frequency, config.session.bar_minutes);
    let dir = save_artifacts(&result, periods, &output_root(&config, output_dir))?;
    print_summary(&result);
    println!("Artifacts: {}", dir.display());
    Ok(())
}

fn optimize_cmd(path: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(path)?;
    let rows = optimize(&config).context("optimisation failed")?;

    let dir = run_dir(&output_root(&config, output_dir), &config.session.name, &config.run_id()?);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let table = dir.join("optimization.csv");
    std::fs::write(&table, export_optimization_csv(&rows)?)
        .with_context(|| format!("failed to write {}", table.display()))?;

    let best = rows
        .iter()
        .filter_map(|row| row.metrics.as_ref().map(|m| (row, m)))
        .max_by(|(_, a), (_, b)| a.sharpe.total_cmp(&b.sharpe));
    println!("Grid points: {}", rows.len());
    if let Some((row, metrics)) = best {
        println!(
            "Best Sharpe: {:.3} with {:?} (total return {:.2}%)",
            metrics.sharpe,
            row.params,
            metrics.total_return * 100.0
        );
    }
    println!("Table: {}", table.display());
    Ok(())
}

fn live_cmd(path: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(path)?;
    let live = config.live()?;
    let periods = periods_per_year(Frequency::Intraday, live.period_minutes);

    let started = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let dir = output_root(&config, output_dir).join(format!("{}_live_{started}", config.session.name));
    let sink: Box<dyn ReportSink> = Box::new(ArtifactSink::new(&dir, periods));

    let report = run_live(&config, stop_flag(), Some(sink)).context("live session failed")?;
    info!(
        ticks = report.stats.ticks,
        fills = report.stats.fills,
        pending = report.pending.len(),
        "live session ended"
    );
    println!("Final equity: {:.2}", report.final_equity().unwrap_or(f64::NAN));
    println!("Report: {}", dir.display());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!("Run:          {}", result.run_id);
    println!("Strategy:     {}", result.strategy.kind());
    println!("Period:       {} to {}", result.start_date, result.end_date);
    if !result.synthetic_symbols.is_empty() {
        println!("Data:         SYNTHETIC ({})", result.synthetic_symbols.join(", "));
    }
    println!("Final equity: {:.2}", m.final_equity);
    println!("Total return: {:.2}%", m.total_return * 100.0);
    println!("CAGR:         {:.2}%", m.cagr * 100.0);
    println!("Sharpe:       {:.3}", m.sharpe);
    println!("Max drawdown: {:.2}%", m.max_drawdown * 100.0);
    println!("Trades:       {}", m.trade_count);
    println!("Commission:   {:.2}", m.total_commission);
}
