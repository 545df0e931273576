// ===============================
// src/risk.rs
// ===============================
//
// Shared risk vocabulary used by every policy. Each check is a free function so
// a policy can mix them freely and each can be tested on its own.
//
use crate::book::BookState;
use crate::domain::{PriceLevel, Side};
use crate::order::OrderRecord;

/// Mid of the touch, `None` when either side is missing or unusable.
pub fn mid_price(bid: Option<PriceLevel>, ask: Option<PriceLevel>) -> Option<f64> {
    let (bid, ask) = (bid?, ask?);
    Some((bid.price + ask.price) as f64 / 2.0)
}

/// Relative distance of `price` from `mid`.
pub fn price_distance(price: i64, mid: f64) -> f64 {
    (price as f64 - mid).abs() / mid
}

/// Hard circuit breaker on the audit trail length.
pub fn exceeds_total_cap(state: &BookState, max_total: usize) -> bool {
    state.all_orders().len() > max_total
}

pub fn outside_band(price: i64, mid: f64, max_distance: f64) -> bool {
    price_distance(price, mid) > max_distance
}

pub fn is_partially_filled(order: &OrderRecord) -> bool {
    order.filled_quantity() > 0 && order.filled_quantity() < order.quantity()
}

/// Exit price for a filled entry, truncated to whole ticks.
pub fn profit_target(entry: i64, threshold: f64) -> i64 {
    // epsilon keeps e.g. 100 * 1.02 from landing on 101.999..
    (entry as f64 * (1.0 + threshold) + 1e-9).floor() as i64
}

/// A profit-taking exit at `target` is supported by the touch on the opposite side.
pub fn touch_supports_exit(entry_side: Side, target: i64, bid: PriceLevel, ask: PriceLevel) -> bool {
    match entry_side {
        Side::Buy => bid.price >= target,
        Side::Sell => ask.price <= target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketView, OrderAck, OrderOrigin};
    use rstest::*;

    #[rstest]
    #[case(Some(PriceLevel::new(98, 1)), Some(PriceLevel::new(100, 1)), Some(99.0))]
    #[case(Some(PriceLevel::new(98, 1)), Some(PriceLevel::new(101, 1)), Some(99.5))]
    #[case(None, Some(PriceLevel::new(100, 1)), None)]
    #[case(Some(PriceLevel::new(98, 1)), None, None)]
    fn mid_of_touch(#[case] bid: Option<PriceLevel>, #[case] ask: Option<PriceLevel>, #[case] want: Option<f64>) {
        assert_eq!(mid_price(bid, ask), want);
    }

    #[rstest]
    #[case(100, 120.0, 0.05, true)]
    #[case(96, 105.0, 0.05, true)]
    #[case(99, 100.0, 0.05, false)]
    #[case(105, 100.0, 0.05, false)]
    fn band(#[case] price: i64, #[case] mid: f64, #[case] max: f64, #[case] out: bool) {
        assert_eq!(outside_band(price, mid, max), out);
    }

    #[rstest]
    #[case(100, 0.02, 102)]
    #[case(100, 0.0, 100)]
    #[case(250, 0.01, 252)]
    #[case(99, 0.02, 100)]
    fn profit_targets(#[case] entry: i64, #[case] t: f64, #[case] want: i64) {
        assert_eq!(profit_target(entry, t), want);
    }

    #[test]
    fn exit_support_by_side() {
        let bid = PriceLevel::new(102, 10);
        let ask = PriceLevel::new(104, 10);
        assert!(touch_supports_exit(Side::Buy, 102, bid, ask));
        assert!(!touch_supports_exit(Side::Buy, 103, bid, ask));
        assert!(touch_supports_exit(Side::Sell, 104, bid, ask));
        assert!(!touch_supports_exit(Side::Sell, 103, bid, ask));
    }

    #[test]
    fn total_cap_counts_every_record() {
        let mut state = BookState::new("XLON", 1);
        state.with_market_update(MarketView::new("XLON", 1)).unwrap();
        for _ in 0..3 {
            let id = state.add_order(Side::Buy, 1, 1, OrderOrigin::Quote);
            state.with_fill_or_cancel(OrderAck::cancel(id)).unwrap();
        }
        assert!(!exceeds_total_cap(&state, 3));
        state.add_order(Side::Buy, 1, 1, OrderOrigin::Quote);
        assert!(exceeds_total_cap(&state, 3));
    }

    #[test]
    fn partial_fill_detection() {
        let mut rec = OrderRecord::new(crate::domain::OrderId(1), Side::Buy, 10, 100, OrderOrigin::Quote);
        assert!(!is_partially_filled(&rec));
        rec.apply_fill(4).unwrap();
        assert!(is_partially_filled(&rec));
        rec.apply_fill(6).unwrap();
        assert!(!is_partially_filled(&rec));
    }
}
