// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One depth level: price in ticks, quantity in units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel { pub price: i64, pub quantity: i64 }

impl PriceLevel {
    pub fn new(price: i64, quantity: i64) -> Self { Self { price, quantity } }

    /// Zero price or zero size carries no usable information.
    pub fn is_usable(&self) -> bool { self.price > 0 && self.quantity > 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstrumentStatus {
    #[default]
    Continuous,
    Auction,
    Halted,
}

impl InstrumentStatus {
    /// Only continuous trading lets a policy act.
    pub fn is_tradeable(&self) -> bool { matches!(self, InstrumentStatus::Continuous) }
}

/// Already-decoded depth snapshot for one instrument.
/// Bids are price-descending, asks price-ascending; level 0 is the touch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketView {
    pub symbol: String,
    pub instrument_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub status: InstrumentStatus,
}

impl MarketView {
    pub fn new(symbol: impl Into<String>, instrument_id: u64) -> Self {
        Self { symbol: symbol.into(), instrument_id, ..Default::default() }
    }

    pub fn with_bids(mut self, levels: &[(i64, i64)]) -> Self {
        self.bids = levels.iter().map(|&(p, q)| PriceLevel::new(p, q)).collect();
        self
    }

    pub fn with_asks(mut self, levels: &[(i64, i64)]) -> Self {
        self.asks = levels.iter().map(|&(p, q)| PriceLevel::new(p, q)).collect();
        self
    }

    pub fn with_status(mut self, status: InstrumentStatus) -> Self {
        self.status = status;
        self
    }

    /// Near touch, if present and usable.
    pub fn best_bid(&self) -> Option<PriceLevel> { self.bids.first().copied().filter(PriceLevel::is_usable) }

    /// Far touch, if present and usable.
    pub fn best_ask(&self) -> Option<PriceLevel> { self.asks.first().copied().filter(PriceLevel::is_usable) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ORD-{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus { New, PartiallyFilled, Filled, Cancelled, Rejected }

impl OrderStatus {
    pub fn is_active(&self) -> bool { matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled) }
    pub fn is_terminal(&self) -> bool { !self.is_active() }
}

/// Why an order exists. Hedge and top-up carry the order they answer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderOrigin {
    #[default]
    Quote,
    Hedge(OrderId),
    TopUp(OrderId),
}

/// The only way a policy can affect the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Action {
    CreateOrder { side: Side, quantity: i64, price: i64, origin: OrderOrigin },
    CancelOrder { order_id: OrderId },
    #[default]
    NoAction,
}

impl Action {
    /// Plain quote; use struct syntax for hedges and top-ups.
    pub fn create(side: Side, quantity: i64, price: i64) -> Self {
        Action::CreateOrder { side, quantity, price, origin: OrderOrigin::Quote }
    }

    pub fn cancel(order_id: OrderId) -> Self { Action::CancelOrder { order_id } }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateOrder { .. } => "create",
            Action::CancelOrder { .. } => "cancel",
            Action::NoAction => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckKind { Fill(i64), CancelAck, RejectAck }

impl AckKind {
    pub fn label(&self) -> &'static str {
        match self {
            AckKind::Fill(_) => "fill",
            AckKind::CancelAck => "cancel_ack",
            AckKind::RejectAck => "reject_ack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck { pub order_id: OrderId, pub kind: AckKind }

impl OrderAck {
    pub fn fill(order_id: OrderId, quantity: i64) -> Self { Self { order_id, kind: AckKind::Fill(quantity) } }
    pub fn cancel(order_id: OrderId) -> Self { Self { order_id, kind: AckKind::CancelAck } }
    pub fn reject(order_id: OrderId) -> Self { Self { order_id, kind: AckKind::RejectAck } }
}

/// What crosses the submission boundary: an action bound to engine-assigned ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submission {
    Create { order_id: OrderId, side: Side, quantity: i64, price: i64 },
    Cancel { order_id: OrderId },
}

// Recorder envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Md(MarketView), Ack(OrderAck), Act(Submission), Note(String) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_levels_are_not_a_touch() {
        let view = MarketView::new("XLON", 1).with_bids(&[(0, 0)]).with_asks(&[(101, 0)]);
        assert_eq!(view.best_bid(), None);
        assert_eq!(view.best_ask(), None);

        let view = view.with_bids(&[(99, 10), (98, 5)]).with_asks(&[(101, 7)]);
        assert_eq!(view.best_bid(), Some(PriceLevel::new(99, 10)));
        assert_eq!(view.best_ask(), Some(PriceLevel::new(101, 7)));
    }

    #[test]
    fn active_family_statuses() {
        assert!(OrderStatus::New.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        for s in [OrderStatus::Filled, OrderStatus::Cancelled, OrderStatus::Rejected] {
            assert!(s.is_terminal(), "{s:?}");
        }
    }

    #[test]
    fn only_continuous_is_tradeable() {
        assert!(InstrumentStatus::Continuous.is_tradeable());
        assert!(!InstrumentStatus::Halted.is_tradeable());
        assert!(!InstrumentStatus::Auction.is_tradeable());
    }
}
