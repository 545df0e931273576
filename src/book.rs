// ===============================
// src/book.rs (market view + own orders, one instrument)
// ===============================
use ahash::AHashMap as HashMap;
use std::fmt::Write as _;
use thiserror::Error;

use crate::domain::{AckKind, MarketView, OrderAck, OrderId, OrderOrigin, OrderStatus, PriceLevel, Side};
use crate::order::{LifecycleError, OrderRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("ack references unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("market update for instrument {got}, book holds {expected}")]
    InstrumentMismatch { expected: u64, got: u64 },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// The single read-only object handed to a policy each cycle.
///
/// `orders` is an append-only audit trail in creation order; the active view is
/// always derived from it, never stored.
#[derive(Debug, Clone)]
pub struct BookState {
    symbol: String,
    instrument_id: u64,
    market: MarketView,
    orders: Vec<OrderRecord>,
    index: HashMap<OrderId, usize>,
    next_id: u64,
}

impl BookState {
    pub fn new(symbol: impl Into<String>, instrument_id: u64) -> Self {
        let symbol = symbol.into();
        Self {
            market: MarketView::new(symbol.clone(), instrument_id),
            symbol,
            instrument_id,
            orders: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn symbol(&self) -> &str { &self.symbol }
    pub fn instrument_id(&self) -> u64 { self.instrument_id }
    pub fn market(&self) -> &MarketView { &self.market }

    /// Levels are replaced wholesale; orders are untouched.
    pub fn with_market_update(&mut self, view: MarketView) -> Result<&mut Self, BookError> {
        if view.instrument_id != self.instrument_id {
            return Err(BookError::InstrumentMismatch { expected: self.instrument_id, got: view.instrument_id });
        }
        self.market = view;
        Ok(self)
    }

    pub fn with_fill_or_cancel(&mut self, ack: OrderAck) -> Result<OrderStatus, BookError> {
        let idx = *self.index.get(&ack.order_id).ok_or(BookError::UnknownOrder(ack.order_id))?;
        let rec = &mut self.orders[idx];
        let status = match ack.kind {
            AckKind::Fill(qty) => rec.apply_fill(qty)?,
            AckKind::CancelAck => rec.apply_cancel_ack()?,
            AckKind::RejectAck => rec.apply_reject_ack()?,
        };
        Ok(status)
    }

    /// Appends a NEW record and returns its id.
    pub(crate) fn add_order(&mut self, side: Side, quantity: i64, price: i64, origin: OrderOrigin) -> OrderId {
        let id = OrderId(self.next_id);
        self.next_id += 1;
        self.index.insert(id, self.orders.len());
        self.orders.push(OrderRecord::new(id, side, quantity, price, origin));
        id
    }

    pub(crate) fn mark_cancel_pending(&mut self, id: OrderId) -> Result<(), BookError> {
        let idx = *self.index.get(&id).ok_or(BookError::UnknownOrder(id))?;
        self.orders[idx].mark_cancel_pending();
        Ok(())
    }

    pub(crate) fn tick_ages(&mut self) {
        self.orders.iter_mut().for_each(OrderRecord::tick_age);
    }

    pub fn all_orders(&self) -> &[OrderRecord] { &self.orders }

    pub fn active_orders(&self) -> impl Iterator<Item = &OrderRecord> + '_ {
        self.orders.iter().filter(|o| o.is_active())
    }

    pub fn active_count(&self) -> usize { self.active_orders().count() }

    pub fn order(&self, id: OrderId) -> Option<&OrderRecord> {
        self.index.get(&id).map(|&i| &self.orders[i])
    }

    pub fn bid_levels(&self) -> usize { self.market.bids.len() }
    pub fn ask_levels(&self) -> usize { self.market.asks.len() }
    pub fn bid_at(&self, i: usize) -> Option<PriceLevel> { self.market.bids.get(i).copied() }
    pub fn ask_at(&self, i: usize) -> Option<PriceLevel> { self.market.asks.get(i).copied() }
    pub fn best_bid(&self) -> Option<PriceLevel> { self.market.best_bid() }
    pub fn best_ask(&self) -> Option<PriceLevel> { self.market.best_ask() }

    /// BID/ASK ladder for logs.
    pub fn render_book(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:>12}|{:>12}|", "|----BID-----", "|----ASK----");
        let depth = self.bid_levels().max(self.ask_levels());
        for i in 0..depth {
            let cell = |l: Option<PriceLevel>| match l {
                Some(l) => format!("{} @ {}", l.quantity, l.price),
                None => " - ".to_string(),
            };
            let _ = writeln!(out, "{:>12}{:>12}", cell(self.bid_at(i)), cell(self.ask_at(i)));
        }
        let _ = writeln!(out, "{:>12}|{:>12}|", "|------------", "|-----------");
        out
    }
}
