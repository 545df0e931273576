// ===============================
// src/order.rs (self-submitted order lifecycle)
// ===============================
//
// NEW -> PARTIALLY_FILLED -> FILLED
// NEW | PARTIALLY_FILLED -> CANCELLED   (cancel ack)
// NEW -> REJECTED                       (reject ack)
//
// Transitions only come from venue acknowledgements. A refused transition
// leaves the record exactly as it was.
//
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{OrderId, OrderOrigin, OrderStatus, Side};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("fill of {fill} on {order_id} would exceed requested {requested} (filled {filled})")]
    InvalidFill { order_id: OrderId, fill: i64, filled: i64, requested: i64 },
    #[error("fill on {order_id} refused, order already {status:?}")]
    InvalidFillOnTerminal { order_id: OrderId, status: OrderStatus },
    #[error("{order_id}: transition {from:?} -> {to:?} not allowed")]
    InvalidTransition { order_id: OrderId, from: OrderStatus, to: OrderStatus },
}

impl LifecycleError {
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleError::InvalidFill { .. } | LifecycleError::InvalidFillOnTerminal { .. } => "invalid_fill",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    id: OrderId,
    side: Side,
    price: i64,
    quantity: i64,
    filled_quantity: i64,
    status: OrderStatus,
    age: u64,
    origin: OrderOrigin,
    #[serde(default)]
    cancel_pending: bool,
}

impl OrderRecord {
    pub fn new(id: OrderId, side: Side, quantity: i64, price: i64, origin: OrderOrigin) -> Self {
        Self { id, side, price, quantity, filled_quantity: 0, status: OrderStatus::New, age: 0, origin, cancel_pending: false }
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn side(&self) -> Side { self.side }
    pub fn price(&self) -> i64 { self.price }
    pub fn quantity(&self) -> i64 { self.quantity }
    pub fn filled_quantity(&self) -> i64 { self.filled_quantity }
    pub fn remaining_quantity(&self) -> i64 { self.quantity - self.filled_quantity }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn origin(&self) -> OrderOrigin { self.origin }

    /// Evaluation passes seen since creation.
    pub fn age(&self) -> u64 { self.age }

    pub fn hedge_of(&self) -> Option<OrderId> {
        match self.origin() { OrderOrigin::Hedge(id) => Some(id), _ => None }
    }

    pub fn top_up_of(&self) -> Option<OrderId> {
        match self.origin() { OrderOrigin::TopUp(id) => Some(id), _ => None }
    }

    /// A cancel went out and its ack has not arrived yet. Status is unaffected.
    pub fn is_cancel_pending(&self) -> bool { self.cancel_pending }

    pub fn is_active(&self) -> bool { self.status.is_active() }
    pub fn is_terminal(&self) -> bool { self.status.is_terminal() }
    pub fn is_fully_filled(&self) -> bool { self.filled_quantity == self.quantity }

    pub fn apply_fill(&mut self, fill: i64) -> Result<OrderStatus, LifecycleError> {
        if self.is_terminal() {
            return Err(LifecycleError::InvalidFillOnTerminal { order_id: self.id, status: self.status });
        }
        // non-positive fills would break monotonicity
        if fill <= 0 || fill > self.remaining_quantity() {
            return Err(LifecycleError::InvalidFill {
                order_id: self.id,
                fill,
                filled: self.filled_quantity,
                requested: self.quantity,
            });
        }
        self.filled_quantity += fill;
        self.status = if self.is_fully_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Ok(self.status)
    }

    pub fn apply_cancel_ack(&mut self) -> Result<OrderStatus, LifecycleError> {
        self.transition(OrderStatus::Cancelled, self.is_active())
    }

    pub fn apply_reject_ack(&mut self) -> Result<OrderStatus, LifecycleError> {
        self.transition(OrderStatus::Rejected, self.status == OrderStatus::New)
    }

    pub(crate) fn mark_cancel_pending(&mut self) { self.cancel_pending = true; }

    pub(crate) fn tick_age(&mut self) { self.age = self.age.saturating_add(1); }

    fn transition(&mut self, to: OrderStatus, allowed: bool) -> Result<OrderStatus, LifecycleError> {
        if !allowed {
            return Err(LifecycleError::InvalidTransition { order_id: self.id, from: self.status, to });
        }
        self.status = to;
        Ok(to)
    }
}
