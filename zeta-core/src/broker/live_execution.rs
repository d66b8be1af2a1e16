//! LiveExecution — submits orders to the broker.
//!
//! Orders the broker could not take (network failure, rejection) go to a
//! pending list and are resubmitted on the next heartbeat. Orders the broker
//! accepted but has not confirmed are polled until they resolve.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::{BrokerClient, RequestStatus, Throttle, TradeTransaction, TransactionKind, TransactionStatus};
use crate::execution::{DroppedOrder, ExecutionError, ExecutionHandler};
use crate::event::{FillEvent, OrderEvent, OrderSide, OrderType};
use crate::price::PriceHandler;

pub struct LiveExecution<C: BrokerClient> {
    client: Arc<C>,
    throttle: Throttle,
    /// Orders to resubmit on the next heartbeat.
    pending: Vec<OrderEvent>,
    /// Submitted orders awaiting a final status, by broker order number.
    awaiting: Vec<(u64, OrderEvent)>,
    dropped: Vec<DroppedOrder>,
}

impl<C: BrokerClient> LiveExecution<C> {
    pub fn new(client: Arc<C>, throttle: Throttle) -> Self {
        Self {
            client,
            throttle,
            pending: Vec::new(),
            awaiting: Vec::new(),
            dropped: Vec::new(),
        }
    }

    fn transaction(order: &OrderEvent) -> Result<TradeTransaction, ExecutionError> {
        let kind = if order.is_exit {
            if order.lot_id == 0 {
                return Err(ExecutionError::MissingLotId { symbol: order.symbol.clone() });
            }
            TransactionKind::Close
        } else if order.lot_id != 0 {
            TransactionKind::Modify
        } else {
            TransactionKind::Open
        };
        Ok(TradeTransaction {
            kind,
            side: order.direction,
            symbol: order.symbol.clone(),
            volume: order.quantity,
            lot_id: order.lot_id,
            comment: if order.is_exit { "exit".into() } else { "entry".into() },
        })
    }

    fn fill_from(&self, order: &OrderEvent, status: &TransactionStatus) -> FillEvent {
        let price = match order.direction {
            OrderSide::Buy => status.ask,
            OrderSide::Sell => status.bid,
        };
        FillEvent {
            datetime: Utc::now().naive_utc(),
            symbol: order.symbol.clone(),
            exchange: self.client.name().to_string(),
            quantity: order.quantity,
            direction: order.direction,
            fill_cost: price,
            commission: 0.0,
            lot_id: if order.lot_id != 0 { order.lot_id } else { status.order },
        }
    }

    /// Act on a transaction status; returns a fill once accepted.
    fn resolve(&mut self, order_number: u64, order: OrderEvent, status: TransactionStatus) -> Option<FillEvent> {
        match status.status {
            RequestStatus::Accepted => {
                info!(symbol = %order.symbol, order_number, "order accepted");
                Some(self.fill_from(&order, &status))
            }
            RequestStatus::Pending => {
                info!(symbol = %order.symbol, order_number, "order pending at broker");
                self.awaiting.push((order_number, order));
                None
            }
            RequestStatus::Rejected | RequestStatus::Error => {
                warn!(
                    symbol = %order.symbol,
                    order_number,
                    status = ?status.status,
                    message = status.message.as_deref().unwrap_or(""),
                    "order not accepted; queued for retry"
                );
                self.pending.push(order);
                None
            }
        }
    }
}

impl<C: BrokerClient> ExecutionHandler for LiveExecution<C> {
    fn name(&self) -> &str {
        "live"
    }

    fn execute_order(
        &mut self,
        order: &OrderEvent,
        _prices: &dyn PriceHandler,
    ) -> Result<Option<FillEvent>, ExecutionError> {
        if order.order_type == OrderType::Limit {
            warn!(symbol = %order.symbol, "limit orders are not supported live");
            self.dropped.push(DroppedOrder {
                datetime: Some(Utc::now().naive_utc()),
                order: order.clone(),
                reason: "limit orders are not supported".into(),
            });
            return Ok(None);
        }
        let transaction = Self::transaction(order)?;

        let order_number = match self.client.submit(&transaction) {
            Ok(number) => number,
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "submit failed; queued for retry");
                self.pending.push(order.clone());
                return Ok(None);
            }
        };
        self.throttle.pause();

        match self.client.transaction_status(order_number) {
            Ok(status) => Ok(self.resolve(order_number, order.clone(), status)),
            Err(e) => {
                // The order reached the broker; poll it rather than resubmitting.
                warn!(symbol = %order.symbol, order_number, error = %e, "status check failed");
                self.awaiting.push((order_number, order.clone()));
                Ok(None)
            }
        }
    }

    fn execute_pending_orders(
        &mut self,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<FillEvent>, ExecutionError> {
        let mut fills = Vec::new();

        for (order_number, order) in std::mem::take(&mut self.awaiting) {
            match self.client.transaction_status(order_number) {
                Ok(status) => fills.extend(self.resolve(order_number, order, status)),
                Err(e) => {
                    warn!(order_number, error = %e, "status poll failed");
                    self.awaiting.push((order_number, order));
                }
            }
            self.throttle.pause();
        }

        for order in std::mem::take(&mut self.pending) {
            fills.extend(self.execute_order(&order, prices)?);
        }
        Ok(fills)
    }

    fn pending_orders(&self) -> Vec<OrderEvent> {
        self.pending
            .iter()
            .cloned()
            .chain(self.awaiting.iter().map(|(_, order)| order.clone()))
            .collect()
    }

    fn dropped_orders(&self) -> &[DroppedOrder] {
        &self.dropped
    }
}
