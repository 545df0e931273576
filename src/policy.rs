// ===============================
// src/policy.rs
// ===============================
//
// One policy shape for every strategy variant. Numeric thresholds live in
// `PolicyConfig`; behaviour differences are hook overrides on `DecisionPolicy`.
//
// Evaluation order (first hit wins, at most one action):
//   0) no usable touch            -> NoAction
//   1) total-order circuit breaker -> NoAction
//   2) cancellations               (active orders without a cancel in flight)
//   3) profit-taking exits         (filled buys, unhedged quantity only)
//   4) partial top-ups             (TopUp mode only, active cap applies)
//   5) new quote                   (active cap + mid band apply)
//
use tracing::debug;

use crate::book::BookState;
use crate::domain::{Action, OrderId, OrderOrigin, OrderStatus, PriceLevel, Side};
use crate::order::OrderRecord;
use crate::risk::{
    exceeds_total_cap, is_partially_filled, mid_price, outside_band, profit_target, touch_supports_exit,
};

/// What to do with an order that is partly filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialFillMode {
    /// Risk first: pull the rest of the order.
    Cancel,
    /// Inventory first: add a new order for the remaining quantity.
    TopUp,
}

/// Where a new buy quote is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteAnchor {
    /// Best bid plus an offset in ticks (negative joins behind the touch).
    NearTouch(i64),
    /// Cross the spread at the best ask.
    FarTouch,
}

/// Fixed per-instance thresholds. Immutable once a policy holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub max_total_orders: usize,
    pub max_active_orders: usize,
    pub max_price_distance_percent: f64,
    pub profit_threshold: f64,
    pub quantity_cap: i64,
    pub partial_fill: PartialFillMode,
    pub quote_anchor: QuoteAnchor,
    /// Keep resting exits at least this many ticks above the best bid:
    /// cheaper ones are pulled and replaced.
    pub reprice_exit_ticks: Option<i64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_total_orders: 10,
            max_active_orders: 3,
            max_price_distance_percent: 0.05,
            profit_threshold: 0.02,
            quantity_cap: 100,
            partial_fill: PartialFillMode::Cancel,
            quote_anchor: QuoteAnchor::NearTouch(1),
            reprice_exit_ticks: None,
        }
    }
}

/// Usable touch for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Touch { pub bid: PriceLevel, pub ask: PriceLevel, pub mid: f64 }

impl Touch {
    pub fn of(state: &BookState) -> Option<Self> {
        let (bid, ask) = (state.best_bid(), state.best_ask());
        let mid = mid_price(bid, ask)?;
        Some(Self { bid: bid?, ask: ask?, mid })
    }
}

type Link = fn(&OrderRecord) -> Option<OrderId>;

/// A hedge or top-up for `target` is still working.
fn has_working_link(state: &BookState, target: OrderId, link: Link) -> bool {
    state.all_orders().iter().any(|o| link(o) == Some(target) && o.is_active())
}

/// Quantity already executed by every hedge or top-up of `target`, cancelled ones included.
fn linked_fills(state: &BookState, target: OrderId, link: Link) -> i64 {
    state.all_orders().iter().filter(|o| link(o) == Some(target)).map(OrderRecord::filled_quantity).sum()
}

/// Pure decision function from a book snapshot to one action.
///
/// Implementors must not block; a panic inside `evaluate` is contained by the
/// evaluation cycle and treated as `NoAction`.
pub trait DecisionPolicy: Send {
    fn name(&self) -> &str;

    fn config(&self) -> &PolicyConfig;

    fn evaluate(&self, state: &BookState) -> Action {
        let cfg = self.config();
        let Some(touch) = Touch::of(state) else {
            debug!(policy = self.name(), "incomplete market data, no action");
            return Action::NoAction;
        };
        if exceeds_total_cap(state, cfg.max_total_orders) {
            debug!(policy = self.name(), total = state.all_orders().len(), "total order cap reached");
            return Action::NoAction;
        }

        if let Some(o) = state.active_orders().find(|o| self.should_cancel(o, &touch)) {
            debug!(policy = self.name(), order_id = %o.id(), price = o.price(), mid = touch.mid, "cancel candidate");
            return Action::cancel(o.id());
        }

        if let Some(a) = state.all_orders().iter().find_map(|o| self.profit_take(state, o, &touch)) {
            return a;
        }

        if state.active_count() >= cfg.max_active_orders {
            debug!(policy = self.name(), active = state.active_count(), "active order cap reached");
            return Action::NoAction;
        }

        if cfg.partial_fill == PartialFillMode::TopUp {
            if let Some(a) = state.active_orders().find_map(|o| self.top_up(state, o, &touch)) {
                return a;
            }
        }

        self.quote(state, &touch).unwrap_or_default()
    }

    /// Mid band breach, a partial fill under `PartialFillMode::Cancel`, or a
    /// stale exit. Orders already being cancelled are left alone.
    fn should_cancel(&self, order: &OrderRecord, touch: &Touch) -> bool {
        if order.is_cancel_pending() {
            return false;
        }
        let cfg = self.config();
        outside_band(order.price(), touch.mid, cfg.max_price_distance_percent)
            || (cfg.partial_fill == PartialFillMode::Cancel && is_partially_filled(order))
            || self.exit_needs_reprice(order, touch)
    }

    fn exit_needs_reprice(&self, order: &OrderRecord, touch: &Touch) -> bool {
        match self.config().reprice_exit_ticks {
            Some(ticks) => order.hedge_of().is_some() && order.side() == Side::Sell && order.price() < touch.bid.price + ticks,
            None => false,
        }
    }

    fn profit_take(&self, state: &BookState, order: &OrderRecord, touch: &Touch) -> Option<Action> {
        if order.side() != Side::Buy || order.status() != OrderStatus::Filled {
            return None;
        }
        if has_working_link(state, order.id(), OrderRecord::hedge_of) {
            return None;
        }
        let quantity = order.filled_quantity() - linked_fills(state, order.id(), OrderRecord::hedge_of);
        if quantity <= 0 {
            return None;
        }
        let cfg = self.config();
        let target = profit_target(order.price(), cfg.profit_threshold);
        if !touch_supports_exit(order.side(), target, touch.bid, touch.ask) {
            return None;
        }
        let price = match cfg.reprice_exit_ticks {
            Some(ticks) => target.max(touch.bid.price + ticks),
            None => target,
        };
        Some(Action::CreateOrder { side: Side::Sell, quantity, price, origin: OrderOrigin::Hedge(order.id()) })
    }

    fn top_up(&self, state: &BookState, order: &OrderRecord, touch: &Touch) -> Option<Action> {
        if !is_partially_filled(order) || has_working_link(state, order.id(), OrderRecord::top_up_of) {
            return None;
        }
        if outside_band(order.price(), touch.mid, self.config().max_price_distance_percent) {
            return None;
        }
        let quantity = order.remaining_quantity() - linked_fills(state, order.id(), OrderRecord::top_up_of);
        if quantity <= 0 {
            return None;
        }
        Some(Action::CreateOrder { side: order.side(), quantity, price: order.price(), origin: OrderOrigin::TopUp(order.id()) })
    }

    fn quote(&self, _state: &BookState, touch: &Touch) -> Option<Action> {
        let cfg = self.config();
        let price = match cfg.quote_anchor {
            QuoteAnchor::NearTouch(offset) => touch.bid.price + offset,
            QuoteAnchor::FarTouch => touch.ask.price,
        };
        let quantity = cfg.quantity_cap.min(touch.ask.quantity);
        if price < 0 || quantity <= 0 || outside_band(price, touch.mid, cfg.max_price_distance_percent) {
            return None;
        }
        Some(Action::create(Side::Buy, quantity, price))
    }
}

/// The configurable policy every preset is built from.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    name: String,
    config: PolicyConfig,
}

impl ThresholdPolicy {
    pub fn new(name: impl Into<String>, config: PolicyConfig) -> Self {
        Self { name: name.into(), config }
    }
}

impl DecisionPolicy for ThresholdPolicy {
    fn name(&self) -> &str { &self.name }
    fn config(&self) -> &PolicyConfig { &self.config }
}
