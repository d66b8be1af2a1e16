//! SimulatedExecution — fills market orders against historic bars.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CommissionModel, DroppedOrder, ExecutionError, ExecutionHandler};
use crate::domain::BarField;
use crate::event::{FillEvent, OrderEvent, OrderType};
use crate::price::{PriceError, PriceHandler};

/// Exchange name stamped on simulated fills.
pub const BACKTEST_EXCHANGE: &str = "BACKTEST EXCHANGE";

/// Which price a simulated market order fills at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillTiming {
    /// Open of the bar after the signal bar.
    #[default]
    NextOpen,
    /// Close of the signal bar.
    CurrentClose,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedExecution {
    timing: FillTiming,
    commission: CommissionModel,
    dropped: Vec<DroppedOrder>,
}

impl SimulatedExecution {
    pub fn new(timing: FillTiming, commission: CommissionModel) -> Self {
        Self { timing, commission, dropped: Vec::new() }
    }

    fn drop_order(&mut self, order: &OrderEvent, prices: &dyn PriceHandler, reason: String) {
        warn!(symbol = %order.symbol, quantity = order.quantity, %reason, "order dropped");
        self.dropped.push(DroppedOrder {
            datetime: prices.latest_bar_datetime().ok(),
            order: order.clone(),
            reason,
        });
    }

    fn fill_price(&self, order: &OrderEvent, prices: &dyn PriceHandler) -> Result<Option<f64>, PriceError> {
        let price = match self.timing {
            FillTiming::NextOpen => match prices.next_open_price(&order.symbol) {
                Ok(price) => price,
                Err(PriceError::NoNextBar { .. }) => return Ok(None),
                Err(e) => return Err(e),
            },
            FillTiming::CurrentClose => prices.latest_bar_value(&order.symbol, BarField::Close)?,
        };
        Ok((price.is_finite() && price > 0.0).then_some(price))
    }
}

impl ExecutionHandler for SimulatedExecution {
    fn name(&self) -> &str {
        "simulated"
    }

    fn execute_order(
        &mut self,
        order: &OrderEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Option<FillEvent>, ExecutionError> {
        if order.order_type == OrderType::Limit {
            self.drop_order(order, prices, "limit orders are not simulated".into());
            return Ok(None);
        }
        let Some(price) = self.fill_price(order, prices)? else {
            self.drop_order(order, prices, format!("no fill price ({:?})", self.timing));
            return Ok(None);
        };

        // a next-open fill happens on the next bar, after that bar's actions
        let datetime = match self.timing {
            FillTiming::NextOpen => match prices.next_bar_datetime() {
                Some(next) => next,
                None => prices.latest_bar_datetime()?,
            },
            FillTiming::CurrentClose => prices.latest_bar_datetime()?,
        };
        let fill = FillEvent {
            datetime,
            symbol: order.symbol.clone(),
            exchange: BACKTEST_EXCHANGE.to_string(),
            quantity: order.quantity,
            direction: order.direction,
            fill_cost: price,
            commission: self.commission.compute(order.quantity, price),
            lot_id: order.lot_id,
        };
        debug!(symbol = %fill.symbol, side = ?fill.direction, quantity = fill.quantity, price, "simulated fill");
        Ok(Some(fill))
    }

    fn dropped_orders(&self) -> &[DroppedOrder] {
        &self.dropped
    }
}
