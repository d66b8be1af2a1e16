//! Backtest runner — wires config, data, book and session together.
//!
//! Two entry points:
//! - `run_backtest()`: loads prices from the configured source, then runs.
//! - `run_backtest_from_data()`: takes pre-loaded prices. Used by the
//!   optimiser so the grid shares one load.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use zeta_core::book::{Book, BookError, EquityBook, MarginBook};
use zeta_core::broker::BrokerError;
use zeta_core::event::EventQueue;
use zeta_core::execution::SimulatedExecution;
use zeta_core::strategy::StrategyError;
use zeta_core::{Portfolio, ReportSink, SessionError, SessionReport, TradingSession};

use crate::config::{BookConfig, ConfigError, RunId, SessionConfig, StrategyConfig};
use crate::data_loader::{load_prices, LoadError, LoadedData};
use crate::metrics::{equity_points, periods_per_year, EquityPoint, PerformanceMetrics};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("book error: {0}")]
    Book(#[from] BookError),
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub name: String,
    pub strategy: StrategyConfig,
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    pub dataset_hash: String,
    pub synthetic_symbols: Vec<String>,
    pub metrics: PerformanceMetrics,
    pub equity: Vec<EquityPoint>,
    pub report: SessionReport,
}

/// Optional extras attached to the session.
#[derive(Default)]
pub struct SessionHooks {
    pub stop: Option<Arc<AtomicBool>>,
    pub sink: Option<Box<dyn ReportSink>>,
}

pub fn run_backtest(config: &SessionConfig, hooks: SessionHooks) -> Result<BacktestResult, RunError> {
    let loaded = load_prices(config)?;
    run_backtest_from_data(config, &loaded, hooks)
}

/// Run against pre-loaded prices; `loaded.prices` is cloned, not consumed.
pub fn run_backtest_from_data(
    config: &SessionConfig,
    loaded: &LoadedData,
    hooks: SessionHooks,
) -> Result<BacktestResult, RunError> {
    let run_id = config.run_id()?;
    let symbols = config.session.symbols.clone();
    let capital = config.session.initial_capital;

    let report = match &config.book {
        BookConfig::Equity { dividends } => {
            let book = EquityBook::new(symbols.clone(), capital).with_dividends(*dividends);
            run_session(config, loaded, book, hooks)?
        }
        BookConfig::Margin { symbols: infos } => {
            let infos = infos
                .iter()
                .filter(|(symbol, _)| symbols.contains(symbol))
                .map(|(symbol, info)| (symbol.clone(), *info))
                .collect();
            let book = MarginBook::new(symbols.clone(), capital, infos)?;
            run_session(config, loaded, book, hooks)?
        }
    };

    let periods = periods_per_year(config.session.frequency, config.session.bar_minutes);
    let metrics = PerformanceMetrics::from_report(&report, periods);
    info!(
        run_id = %run_id,
        total_return = metrics.total_return,
        sharpe = metrics.sharpe,
        max_drawdown = metrics.max_drawdown,
        trades = metrics.trade_count,
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        name: config.session.name.clone(),
        strategy: config.strategy.clone(),
        symbols,
        start_date: config.session.start.to_string(),
        end_date: config.session.end.to_string(),
        initial_capital: capital,
        dataset_hash: loaded.dataset_hash.clone(),
        synthetic_symbols: loaded.synthetic_symbols.clone(),
        metrics,
        equity: equity_points(&report.holdings),
        report,
    })
}

fn run_session<B: Book>(
    config: &SessionConfig,
    loaded: &LoadedData,
    book: B,
    hooks: SessionHooks,
) -> Result<SessionReport, RunError> {
    let strategy = config.strategy.build()?;
    let execution = SimulatedExecution::new(config.execution.fill_timing, config.execution.commission);
    let mut session = TradingSession::new(
        loaded.prices.clone(),
        strategy,
        Portfolio::new(book, config.session.lot_size),
        execution,
        EventQueue::new(),
    );
    if let Some(stop) = hooks.stop {
        session = session.with_stop_flag(stop);
    }
    if let Some(sink) = hooks.sink {
        session = session.with_sink(sink);
    }
    Ok(session.run()?)
}
