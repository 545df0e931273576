// ===============================
// src/cycle.rs (gate + evaluate + dispatch)
// ===============================
//
// One inbound event (or batch) is applied to the book, then the one-shot latch
// decides whether the policy runs. A run yields at most one action, which is
// bound to an order id and handed to the submission boundary exactly once.
//
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

use crate::book::{BookError, BookState};
use crate::domain::{Action, MarketView, OrderAck, Submission};
use crate::gateway::SubmissionBoundary;
use crate::metrics::{
    ACKS, ACTIONS, EVALUATIONS, GATE_SKIPS, LIFECYCLE_ERRORS, MARKET_UPDATES, ORDERS_ACTIVE, ORDERS_TOTAL,
    POLICY_PANICS, SUBMIT_REJECTS,
};
use crate::policy::DecisionPolicy;

/// One-shot latch: armed by inbound events, consumed by a policy run.
#[derive(Debug, Default)]
pub struct RunTrigger { armed: bool }

impl RunTrigger {
    pub fn trigger_run(&mut self) { self.armed = true; }
    pub fn should_run(&self) -> bool { self.armed }
    pub fn has_run(&mut self) { self.armed = false; }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent { Market(MarketView), Ack(OrderAck) }

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Latch not armed; policy not invoked.
    Skipped,
    /// Latch consumed but the instrument is not in continuous trading.
    Halted,
    /// Policy panicked; treated as no action.
    PolicyFailed,
    NoAction,
    Dispatched(Submission),
    /// Action dropped by the engine or refused by the boundary.
    Refused(Action),
}

pub struct EvaluationCycle<P, S> {
    state: BookState,
    policy: P,
    submitter: S,
    trigger: RunTrigger,
}

impl<P: DecisionPolicy, S: SubmissionBoundary> EvaluationCycle<P, S> {
    pub fn new(state: BookState, policy: P, submitter: S) -> Self {
        Self { state, policy, submitter, trigger: RunTrigger::default() }
    }

    pub fn state(&self) -> &BookState { &self.state }
    pub fn policy(&self) -> &P { &self.policy }

    #[cfg(test)]
    pub(crate) fn submitter_mut(&mut self) -> &mut S { &mut self.submitter }

    pub fn on_event(&mut self, event: InboundEvent) -> CycleOutcome {
        self.apply(event);
        self.run_if_triggered()
    }

    /// Applies every event, then evaluates at most once.
    pub fn on_batch(&mut self, events: impl IntoIterator<Item = InboundEvent>) -> CycleOutcome {
        for event in events {
            self.apply(event);
        }
        self.run_if_triggered()
    }

    fn apply(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Market(view) => match self.state.with_market_update(view) {
                Ok(_) => {
                    MARKET_UPDATES.inc();
                    self.trigger.trigger_run();
                }
                Err(e) => warn!(%e, symbol = self.state.symbol(), "market update dropped"),
            },
            InboundEvent::Ack(ack) => {
                ACKS.with_label_values(&[ack.kind.label()]).inc();
                match self.state.with_fill_or_cancel(ack) {
                    Ok(status) => {
                        debug!(order_id = %ack.order_id, ?status, "ack applied");
                        self.trigger.trigger_run();
                    }
                    Err(BookError::Lifecycle(e)) => {
                        LIFECYCLE_ERRORS.with_label_values(&[e.label()]).inc();
                        warn!(%e, "ack refused, order unchanged");
                    }
                    Err(e) => {
                        LIFECYCLE_ERRORS.with_label_values(&["unknown_order"]).inc();
                        error!(%e, ?ack, "ack dropped");
                    }
                }
            }
        }
        self.publish_counts();
    }

    pub fn run_if_triggered(&mut self) -> CycleOutcome {
        if !self.trigger.should_run() {
            GATE_SKIPS.inc();
            return CycleOutcome::Skipped;
        }
        self.trigger.has_run();
        self.state.tick_ages();

        if !self.state.market().status.is_tradeable() {
            debug!(status = ?self.state.market().status, "instrument not tradeable, no action");
            return CycleOutcome::Halted;
        }

        debug!(
            policy = self.policy.name(),
            symbol = self.state.symbol(),
            instrument_id = self.state.instrument_id(),
            book = %self.state.render_book(),
            "evaluating"
        );
        EVALUATIONS.inc();
        let (policy, state) = (&self.policy, &self.state);
        let action = match catch_unwind(AssertUnwindSafe(|| policy.evaluate(state))) {
            Ok(action) => action,
            Err(_) => {
                POLICY_PANICS.inc();
                error!(policy = self.policy.name(), "policy panicked, treating as no action");
                return CycleOutcome::PolicyFailed;
            }
        };
        let outcome = self.dispatch(action);
        self.publish_counts();
        outcome
    }

    fn dispatch(&mut self, action: Action) -> CycleOutcome {
        let submission = match action {
            Action::NoAction => return CycleOutcome::NoAction,
            Action::CancelOrder { order_id } => {
                if !self.state.order(order_id).is_some_and(|o| o.is_active()) {
                    warn!(%order_id, "cancel target is not active, dropped");
                    return CycleOutcome::Refused(action);
                }
                Submission::Cancel { order_id }
            }
            Action::CreateOrder { side, quantity, price, origin } => {
                let order_id = self.state.add_order(side, quantity, price, origin);
                Submission::Create { order_id, side, quantity, price }
            }
        };

        ACTIONS.with_label_values(&[action.kind()]).inc();
        match self.submitter.submit(submission) {
            Ok(()) => {
                info!(?submission, "dispatched");
                if let Submission::Cancel { order_id } = submission {
                    if let Err(e) = self.state.mark_cancel_pending(order_id) {
                        error!(%e, "could not mark cancel pending");
                    }
                }
                CycleOutcome::Dispatched(submission)
            }
            Err(e) => {
                SUBMIT_REJECTS.inc();
                warn!(%e, ?submission, "submission refused");
                if let Submission::Create { order_id, .. } = submission {
                    if let Err(e) = self.state.with_fill_or_cancel(OrderAck::reject(order_id)) {
                        error!(%e, "could not mark refused order rejected");
                    }
                }
                CycleOutcome::Refused(action)
            }
        }
    }

    fn publish_counts(&self) {
        ORDERS_ACTIVE.set(self.state.active_count() as i64);
        ORDERS_TOTAL.set(self.state.all_orders().len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstrumentStatus, OrderId, OrderOrigin, OrderStatus, Side};
    use crate::gateway::SubmitError;
    use crate::policy::{PolicyConfig, ThresholdPolicy};
    use rstest::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    fn view(bids: &[(i64, i64)], asks: &[(i64, i64)]) -> MarketView {
        MarketView::new("XLON", 123).with_bids(bids).with_asks(asks)
    }

    fn tick() -> InboundEvent {
        InboundEvent::Market(view(&[(98, 100), (95, 200)], &[(100, 101), (110, 200)]))
    }

    /// Returns a fixed action and counts invocations.
    struct Scripted { action: Action, calls: Cell<usize>, cfg: PolicyConfig }

    impl Scripted {
        fn new(action: Action) -> Self { Self { action, calls: Cell::new(0), cfg: PolicyConfig::default() } }
    }

    impl DecisionPolicy for Scripted {
        fn name(&self) -> &str { "scripted" }
        fn config(&self) -> &PolicyConfig { &self.cfg }
        fn evaluate(&self, _state: &BookState) -> Action {
            self.calls.set(self.calls.get() + 1);
            self.action
        }
    }

    struct Exploding(PolicyConfig);

    impl DecisionPolicy for Exploding {
        fn name(&self) -> &str { "exploding" }
        fn config(&self) -> &PolicyConfig { &self.0 }
        fn evaluate(&self, state: &BookState) -> Action {
            if state.all_orders().is_empty() {
                panic!("nothing to evaluate");
            }
            Action::NoAction
        }
    }

    struct Refusing;

    impl SubmissionBoundary for Refusing {
        fn submit(&mut self, _submission: Submission) -> Result<(), SubmitError> { Err(SubmitError::ChannelFull) }
    }

    fn engine<P: DecisionPolicy>(policy: P) -> EvaluationCycle<P, VecDeque<Submission>> {
        EvaluationCycle::new(BookState::new("XLON", 123), policy, VecDeque::new())
    }

    #[fixture]
    fn mm() -> EvaluationCycle<ThresholdPolicy, VecDeque<Submission>> {
        engine(ThresholdPolicy::new("market_maker", PolicyConfig::default()))
    }

    #[test]
    fn latch_runs_policy_once_per_update() {
        let mut e = engine(Scripted::new(Action::NoAction));
        assert_eq!(e.on_event(tick()), CycleOutcome::NoAction);
        assert_eq!(e.run_if_triggered(), CycleOutcome::Skipped);
        assert_eq!(e.policy().calls.get(), 1);

        e.on_event(tick());
        assert_eq!(e.policy().calls.get(), 2);
    }

    #[test]
    fn batch_evaluates_once() {
        let mut e = engine(Scripted::new(Action::create(Side::Buy, 10, 99)));
        let outcome = e.on_batch([tick(), tick(), tick()]);
        assert!(matches!(outcome, CycleOutcome::Dispatched(_)));
        assert_eq!(e.policy().calls.get(), 1);
        assert_eq!(e.state().all_orders().len(), 1);
        assert_eq!(e.submitter_mut().len(), 1);
    }

    #[rstest]
    fn create_is_bound_to_a_new_record(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        let outcome = mm.on_event(tick());
        let sub = Submission::Create { order_id: OrderId(1), side: Side::Buy, quantity: 100, price: 99 };
        assert_eq!(outcome, CycleOutcome::Dispatched(sub));
        assert_eq!(mm.submitter_mut().pop_front(), Some(sub));
        let rec = mm.state().order(OrderId(1)).unwrap();
        assert_eq!(rec.status(), OrderStatus::New);
        assert_eq!(rec.age(), 0);

        mm.on_event(tick());
        assert_eq!(mm.state().order(OrderId(1)).unwrap().age(), 1);
    }

    #[rstest]
    #[case(InstrumentStatus::Halted)]
    #[case(InstrumentStatus::Auction)]
    fn non_continuous_status_forces_no_action(#[case] status: InstrumentStatus) {
        let mut e = engine(Scripted::new(Action::create(Side::Buy, 10, 99)));
        let halted = view(&[(98, 100)], &[(100, 100)]).with_status(status);
        assert_eq!(e.on_event(InboundEvent::Market(halted)), CycleOutcome::Halted);
        assert_eq!(e.policy().calls.get(), 0);
        assert!(e.state().all_orders().is_empty());
    }

    #[test]
    fn panicking_policy_degrades_to_no_action() {
        let mut e = engine(Exploding(PolicyConfig::default()));
        assert_eq!(e.on_event(tick()), CycleOutcome::PolicyFailed);
        assert!(e.state().all_orders().is_empty());
        assert!(e.submitter_mut().is_empty());
        // engine keeps going
        assert_eq!(e.on_event(tick()), CycleOutcome::PolicyFailed);
    }

    #[test]
    fn refused_create_is_marked_rejected() {
        let policy = Scripted::new(Action::create(Side::Buy, 10, 99));
        let mut e = EvaluationCycle::new(BookState::new("XLON", 123), policy, Refusing);
        assert!(matches!(e.on_event(tick()), CycleOutcome::Refused(_)));
        let rec = &e.state().all_orders()[0];
        assert_eq!(rec.status(), OrderStatus::Rejected);
        assert_eq!(e.state().active_count(), 0);
    }

    #[test]
    fn invalid_create_is_rejected_by_boundary() {
        let mut e = engine(Scripted::new(Action::create(Side::Buy, 0, 99)));
        assert!(matches!(e.on_event(tick()), CycleOutcome::Refused(_)));
        assert_eq!(e.state().all_orders()[0].status(), OrderStatus::Rejected);
    }

    #[test]
    fn cancel_of_inactive_order_is_dropped() {
        let mut e = engine(Scripted::new(Action::cancel(OrderId(9))));
        assert_eq!(e.on_event(tick()), CycleOutcome::Refused(Action::cancel(OrderId(9))));
        assert!(e.submitter_mut().is_empty());
    }

    #[rstest]
    fn unknown_ack_is_dropped_without_evaluation(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        mm.on_event(tick());
        let before = mm.state().all_orders().to_vec();
        assert_eq!(mm.on_event(InboundEvent::Ack(OrderAck::fill(OrderId(77), 5))), CycleOutcome::Skipped);
        assert_eq!(mm.state().all_orders(), before.as_slice());
    }

    #[rstest]
    fn overfill_ack_leaves_record_untouched(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        let mut e = engine(Scripted::new(Action::create(Side::Buy, 50, 100)));
        e.on_event(tick());
        let id = e.state().all_orders()[0].id();
        assert_eq!(e.on_event(InboundEvent::Ack(OrderAck::fill(id, 60))), CycleOutcome::Skipped);
        let rec = e.state().order(id).unwrap();
        assert_eq!((rec.filled_quantity(), rec.status()), (0, OrderStatus::New));

        // the same through a real policy: nothing else moves either
        mm.on_event(tick());
        assert_eq!(mm.on_event(InboundEvent::Ack(OrderAck::fill(OrderId(1), 1000))), CycleOutcome::Skipped);
        assert_eq!(mm.state().active_count(), 1);
    }

    #[rstest]
    fn cancel_ack_twice_is_idempotent(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        mm.on_event(tick());
        let id = OrderId(1);
        mm.on_event(InboundEvent::Ack(OrderAck::cancel(id)));
        let snapshot = mm.state().order(id).cloned();
        assert_eq!(mm.on_event(InboundEvent::Ack(OrderAck::cancel(id))), CycleOutcome::Skipped);
        assert_eq!(mm.state().order(id).cloned(), snapshot);
        assert_eq!(snapshot.map(|o| o.status()), Some(OrderStatus::Cancelled));
    }

    #[rstest]
    fn at_most_one_action_per_update(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        let mut sent = 0;
        let mut acted = 0;
        let mut updates = 0;
        for i in 0..40i64 {
            let bid = 95 + (i * 7) % 11;
            let ev = if i % 5 == 4 {
                InboundEvent::Market(view(&[], &[(bid + 2, 50)]))
            } else {
                InboundEvent::Market(view(&[(bid, 80)], &[(bid + 2, 50 + i)]))
            };
            updates += 1;
            if matches!(mm.on_event(ev), CycleOutcome::Dispatched(_)) {
                acted += 1;
            }
            sent += mm.submitter_mut().drain(..).count();
            for o in mm.state().active_orders() {
                assert!(o.status().is_active());
            }
        }
        assert!(sent <= updates);
        assert_eq!(sent, acted);
        assert!(mm.state().all_orders().len() <= 11);
    }

    #[rstest]
    fn risk_cancel_then_cancel_ack_frees_a_slot(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        mm.on_event(tick());
        mm.submitter_mut().clear();
        let far = InboundEvent::Market(view(&[(118, 100)], &[(122, 100)]));
        assert_eq!(mm.on_event(far), CycleOutcome::Dispatched(Submission::Cancel { order_id: OrderId(1) }));
        // still active until the venue confirms
        assert_eq!(mm.state().active_count(), 1);

        let outcome = mm.on_event(InboundEvent::Ack(OrderAck::cancel(OrderId(1))));
        assert_eq!(
            outcome,
            CycleOutcome::Dispatched(Submission::Create { order_id: OrderId(2), side: Side::Buy, quantity: 100, price: 119 })
        );
    }

    #[rstest]
    fn cancel_goes_out_once_while_awaiting_ack(mut mm: EvaluationCycle<ThresholdPolicy, VecDeque<Submission>>) {
        mm.on_event(tick());
        let cancel = CycleOutcome::Dispatched(Submission::Cancel { order_id: OrderId(1) });
        let mut cancels = 0;
        for _ in 0..3 {
            let far = InboundEvent::Market(view(&[(118, 100)], &[(122, 100)]));
            if mm.on_event(far) == cancel {
                cancels += 1;
            }
        }
        assert_eq!(cancels, 1);
        let rec = mm.state().order(OrderId(1)).unwrap();
        assert!(rec.is_cancel_pending());
        assert!(rec.is_active());
    }

    #[test]
    fn cancelled_partial_hedge_is_replaced_by_the_unsold_rest() {
        let mut state = BookState::new("XLON", 123);
        let buy = state.add_order(Side::Buy, 100, 100, OrderOrigin::Quote);
        state.with_fill_or_cancel(OrderAck::fill(buy, 100)).unwrap();
        let mut e = EvaluationCycle::new(state, ThresholdPolicy::new("market_maker", PolicyConfig::default()), VecDeque::new());

        let up = InboundEvent::Market(view(&[(102, 50)], &[(103, 50)]));
        assert_eq!(
            e.on_event(up),
            CycleOutcome::Dispatched(Submission::Create { order_id: OrderId(2), side: Side::Sell, quantity: 100, price: 102 })
        );
        assert_eq!(
            e.on_event(InboundEvent::Ack(OrderAck::fill(OrderId(2), 30))),
            CycleOutcome::Dispatched(Submission::Cancel { order_id: OrderId(2) })
        );
        assert_eq!(
            e.on_event(InboundEvent::Ack(OrderAck::cancel(OrderId(2)))),
            CycleOutcome::Dispatched(Submission::Create { order_id: OrderId(3), side: Side::Sell, quantity: 70, price: 102 })
        );

        // sold plus still offered never exceeds what was bought
        let offered: i64 = e
            .state()
            .all_orders()
            .iter()
            .filter(|o| o.side() == Side::Sell)
            .map(|o| if o.is_active() { o.quantity() } else { o.filled_quantity() })
            .sum();
        assert_eq!(offered, 100);

        let outcome = e.on_event(InboundEvent::Ack(OrderAck::fill(OrderId(3), 70)));
        assert!(!matches!(outcome, CycleOutcome::Dispatched(Submission::Create { side: Side::Sell, .. })));
    }
}
