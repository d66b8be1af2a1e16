//! Zeta Core — event-driven backtest and live trading engine.
//!
//! This crate contains the engine and its collaborators:
//! - Events and the injected FIFO event queue
//! - Price handlers (historic replay with pad alignment, live broker polling)
//! - Strategy trait plus two reference strategies
//! - Sizing policies as a closed enum with one `match` dispatch
//! - Books (equity, margin, live) over an append-only snapshot ledger
//! - Execution handlers (simulated fills, live broker submission)
//! - The trading session loop that drains the queue each tick

pub mod book;
pub mod broker;
pub mod domain;
pub mod event;
pub mod execution;
pub mod portfolio;
pub mod price;
pub mod session;
pub mod sizing;
pub mod strategy;

pub use book::{Book, BookError};
pub use event::{Event, EventQueue};
pub use execution::{ExecutionError, ExecutionHandler};
pub use portfolio::{Portfolio, PortfolioError, Rejection};
pub use price::{PriceError, PriceHandler};
pub use session::{ReportSink, SessionError, SessionMode, SessionReport, SessionStats, TradingSession};
pub use sizing::{SizingError, SizingPolicy};
pub use strategy::{Strategy, StrategyError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: components can be moved to a worker thread.
    ///
    /// The optimiser runs sessions on a rayon pool and the live runner hands
    /// the session a stop flag from a signal handler, so every component and
    /// every value crossing a session boundary must stay Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Events
        require_send::<event::Event>();
        require_sync::<event::Event>();
        require_send::<EventQueue>();
        require_sync::<EventQueue>();

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Ledger>();
        require_sync::<domain::Ledger>();
        require_send::<domain::SymbolInfo>();
        require_sync::<domain::SymbolInfo>();

        // Components
        require_send::<price::HistoricPriceHandler>();
        require_sync::<price::HistoricPriceHandler>();
        require_send::<book::EquityBook>();
        require_sync::<book::EquityBook>();
        require_send::<book::MarginBook>();
        require_sync::<book::MarginBook>();
        require_send::<execution::SimulatedExecution>();
        require_sync::<execution::SimulatedExecution>();
        require_send::<strategy::BuyAndHold>();
        require_sync::<strategy::BuyAndHold>();
        require_send::<strategy::MaCrossover>();
        require_sync::<strategy::MaCrossover>();

        // Live components
        require_send::<broker::LiveBook<broker::XtbClient>>();
        require_sync::<broker::LiveBook<broker::XtbClient>>();
        require_send::<broker::LiveExecution<broker::XtbClient>>();
        require_sync::<broker::LiveExecution<broker::XtbClient>>();
        require_send::<broker::LivePriceHandler<broker::XtbClient>>();
        require_sync::<broker::LivePriceHandler<broker::XtbClient>>();

        // Results
        require_send::<SessionReport>();
        require_sync::<SessionReport>();
        require_send::<Rejection>();
        require_sync::<Rejection>();
    }

    /// Strategies see prices only; the book is not reachable from a signal
    /// generator. If the trait grows a portfolio parameter this stops compiling.
    #[test]
    fn strategy_trait_has_no_book_parameter() {
        fn _check_trait_object_builds(
            strategy: &mut dyn Strategy,
            market: &event::MarketEvent,
            prices: &dyn PriceHandler,
        ) -> Result<Vec<event::SignalEvent>, StrategyError> {
            strategy.calculate_signals(market, prices)
        }
    }

    /// Books and execution handlers are object-safe so runners can hold them
    /// behind `Box<dyn ...>` if they choose.
    #[test]
    fn component_traits_are_object_safe() {
        fn _book(_: &dyn Book) {}
        fn _execution(_: &dyn ExecutionHandler) {}
        fn _prices(_: &dyn PriceHandler) {}
        fn _sink(_: &dyn ReportSink) {}
    }
}
