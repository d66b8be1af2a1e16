//! Trading session — the event loop that ties the components together.
//!
//! Each tick advances the price handler once and then drains the queue
//! completely before the next advance:
//!
//! ```text
//! update_bars ─► Market ─► Strategy::calculate_signals + Portfolio::update_timeindex
//!             ─► Signal ─► Portfolio::update_signal
//!             ─► Order  ─► ExecutionHandler::execute_order
//!             ─► Fill   ─► Portfolio::update_fill
//! ```
//!
//! A backtest ends when the price handler runs out of bars. A live session
//! ends at its deadline. Either ends early when the stop flag is raised, and
//! every exit path still builds the final report and hands it to the sink.

use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::book::{Book, BookError};
use crate::domain::{HoldingsSnapshot, PositionSnapshot, TradeRecord};
use crate::event::{Event, EventQueue, OrderEvent};
use crate::execution::{DroppedOrder, ExecutionError, ExecutionHandler};
use crate::portfolio::{Portfolio, PortfolioError, Rejection};
use crate::price::{PriceError, PriceHandler};
use crate::strategy::{Strategy, StrategyError};

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("price handler: {0}")]
    Price(#[from] PriceError),

    #[error("strategy: {0}")]
    Strategy(#[from] StrategyError),

    #[error("portfolio: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("book: {0}")]
    Book(#[from] BookError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("report output: {0}")]
    Output(Box<dyn StdError + Send + Sync>),
}

impl SessionError {
    /// Broker connectivity failures, wherever they surfaced.
    pub fn is_transient(&self) -> bool {
        fn price(e: &PriceError) -> bool {
            matches!(e, PriceError::Broker(b) if b.is_transient())
        }
        match self {
            Self::Price(e) | Self::Strategy(StrategyError::Price(e)) => price(e),
            Self::Portfolio(PortfolioError::Price(e)) => price(e),
            Self::Portfolio(PortfolioError::Book(e)) | Self::Book(e) => e.is_transient(),
            Self::Execution(ExecutionError::Broker(b)) => b.is_transient(),
            Self::Execution(ExecutionError::Price(e)) => price(e),
            _ => false,
        }
    }
}

// ─── Mode, stats, report ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Run until the price handler has no more bars.
    Backtest,
    /// Run until the wall clock passes `deadline`, retrying pending orders
    /// every heartbeat.
    Live { deadline: DateTime<Utc> },
}

impl SessionMode {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub signals: u64,
    pub orders: u64,
    pub fills: u64,
    pub rejections: u64,
}

/// Everything a performance module needs at the end of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub book_name: String,
    pub strategy_name: String,
    pub holdings: Vec<HoldingsSnapshot>,
    pub positions: Vec<PositionSnapshot>,
    pub trades: Vec<TradeRecord>,
    pub rejections: Vec<Rejection>,
    pub dropped: Vec<DroppedOrder>,
    pub pending: Vec<OrderEvent>,
    pub stats: SessionStats,
}

impl SessionReport {
    pub fn final_equity(&self) -> Option<f64> {
        self.holdings.last().map(|h| h.total)
    }
}

/// Receives the final report once the loop exits.
pub trait ReportSink: Send {
    fn write(&mut self, report: &SessionReport) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

// ─── Session ─────────────────────────────────────────────────────────

pub struct TradingSession<P, S, B, E>
where
    P: PriceHandler,
    S: Strategy,
    B: Book,
    E: ExecutionHandler,
{
    prices: P,
    strategy: S,
    portfolio: Portfolio<B>,
    execution: E,
    queue: EventQueue,
    mode: SessionMode,
    heartbeat: Duration,
    stats: SessionStats,
    stop: Option<Arc<AtomicBool>>,
    sink: Option<Box<dyn ReportSink>>,
}

impl<P, S, B, E> TradingSession<P, S, B, E>
where
    P: PriceHandler,
    S: Strategy,
    B: Book,
    E: ExecutionHandler,
{
    pub fn new(prices: P, strategy: S, portfolio: Portfolio<B>, execution: E, queue: EventQueue) -> Self {
        Self {
            prices,
            strategy,
            portfolio,
            execution,
            queue,
            mode: SessionMode::Backtest,
            heartbeat: Duration::ZERO,
            stats: SessionStats::default(),
            stop: None,
            sink: None,
        }
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sleep between ticks. Zero for backtests.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// The loop stops after the current tick once `flag` is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn portfolio(&self) -> &Portfolio<B> {
        &self.portfolio
    }

    pub fn prices(&self) -> &P {
        &self.prices
    }

    pub fn execution(&self) -> &E {
        &self.execution
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run the loop to completion and return the final report.
    ///
    /// Any non-transient error halts the session without advancing past the
    /// failed tick. In live mode broker connectivity errors are logged and
    /// the tick moves on.
    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        info!(
            strategy = self.strategy.name(),
            book = self.portfolio.book().name(),
            execution = self.execution.name(),
            prices = self.prices.name(),
            live = self.mode.is_live(),
            "session started"
        );

        while self.should_continue() {
            self.tick()?;
            if !self.heartbeat.is_zero() {
                std::thread::sleep(self.heartbeat);
            }
        }

        let report = self.report();
        info!(
            ticks = report.stats.ticks,
            fills = report.stats.fills,
            rejections = report.stats.rejections,
            final_equity = report.final_equity(),
            "session finished"
        );
        if let Some(sink) = self.sink.as_mut() {
            sink.write(&report).map_err(SessionError::Output)?;
        }
        Ok(report)
    }

    fn should_continue(&self) -> bool {
        if self.stop.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            info!("stop requested");
            return false;
        }
        match self.mode {
            SessionMode::Backtest => self.prices.continue_backtest(),
            SessionMode::Live { deadline } => Utc::now() < deadline && self.prices.continue_backtest(),
        }
    }

    /// One heartbeat: retry pending orders (live), advance prices, drain.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        if self.mode.is_live() {
            match self.execution.execute_pending_orders(&self.prices) {
                Ok(fills) => self.queue.extend(fills.into_iter().map(Event::Fill)),
                Err(e) => self.tolerate(e.into())?,
            }
        }

        if let Err(e) = self.prices.update_bars(&mut self.queue) {
            self.tolerate(e.into())?;
        }

        while let Some(event) = self.queue.get() {
            if let Err(e) = self.dispatch(event) {
                self.tolerate(e)?;
            }
        }
        Ok(())
    }

    fn tolerate(&self, err: SessionError) -> Result<(), SessionError> {
        if self.mode.is_live() && err.is_transient() {
            warn!(error = %err, "broker unavailable, continuing");
            Ok(())
        } else {
            Err(err)
        }
    }

    fn dispatch(&mut self, event: Event) -> Result<(), SessionError> {
        debug!(kind = event.kind(), "dispatch");
        match event {
            Event::Market(market) => {
                self.stats.ticks += 1;
                let signals = self.strategy.calculate_signals(&market, &self.prices)?;
                self.portfolio.update_timeindex(&self.prices)?;
                self.queue.extend(signals.into_iter().map(Event::Signal));
            }
            Event::Signal(signal) => {
                self.stats.signals += 1;
                let rejected_before = self.portfolio.rejections().len();
                let orders = self.portfolio.update_signal(&signal, &self.prices)?;
                self.stats.rejections += (self.portfolio.rejections().len() - rejected_before) as u64;
                self.queue.extend(orders.into_iter().map(Event::Order));
            }
            Event::Order(order) => {
                self.stats.orders += 1;
                if let Some(fill) = self.execution.execute_order(&order, &self.prices)? {
                    self.queue.put(Event::Fill(fill));
                }
            }
            Event::Fill(fill) => {
                self.stats.fills += 1;
                self.portfolio.update_fill(&fill)?;
            }
            Event::Close => debug!("close event"),
        }
        Ok(())
    }

    /// Snapshot of the ledger, rejections and execution state so far.
    pub fn report(&self) -> SessionReport {
        let ledger = self.portfolio.book().ledger();
        SessionReport {
            book_name: self.portfolio.book().name().to_string(),
            strategy_name: self.strategy.name().to_string(),
            holdings: ledger.holdings().to_vec(),
            positions: ledger.positions().to_vec(),
            trades: ledger.trades().to_vec(),
            rejections: self.portfolio.rejections().to_vec(),
            dropped: self.execution.dropped_orders().to_vec(),
            pending: self.execution.pending_orders(),
            stats: self.stats,
        }
    }
}
