//! Strategies — turn market events into signals.
//!
//! A strategy sees bars only through the price handler and never sizes
//! orders; it picks a direction, a strength and a sizing policy per signal.

pub mod buy_and_hold;
pub mod ma_crossover;

pub use buy_and_hold::BuyAndHold;
pub use ma_crossover::MaCrossover;

use thiserror::Error;

use crate::event::{MarketEvent, SignalEvent};
use crate::price::{PriceError, PriceHandler};

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid strategy parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Price(#[from] PriceError),
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Signals for the bar announced by `market`, in emission order.
    fn calculate_signals(
        &mut self,
        market: &MarketEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<SignalEvent>, StrategyError>;
}
