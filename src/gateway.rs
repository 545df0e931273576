// ===============================
// src/gateway.rs (submission boundary + simulated venue)
// ===============================
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::domain::{MarketView, OrderAck, OrderId, Side, Submission};
use crate::metrics::EXECS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("invalid order {order_id}: quantity {quantity}, price {price}")]
    InvalidOrder { order_id: OrderId, quantity: i64, price: i64 },
    #[error("submission channel full")]
    ChannelFull,
    #[error("submission channel closed")]
    ChannelClosed,
}

/// Where the engine hands actions off. Must not block.
pub trait SubmissionBoundary {
    fn submit(&mut self, submission: Submission) -> Result<(), SubmitError>;
}

pub fn validate(submission: &Submission) -> Result<(), SubmitError> {
    match *submission {
        Submission::Create { order_id, quantity, price, .. } if quantity <= 0 || price < 0 => {
            Err(SubmitError::InvalidOrder { order_id, quantity, price })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
impl SubmissionBoundary for std::collections::VecDeque<Submission> {
    fn submit(&mut self, submission: Submission) -> Result<(), SubmitError> {
        validate(&submission)?;
        self.push_back(submission);
        Ok(())
    }
}

/// Forwards submissions to a venue task without waiting.
pub struct ChannelSubmitter {
    tx: mpsc::Sender<Submission>,
}

impl ChannelSubmitter {
    pub fn new(tx: mpsc::Sender<Submission>) -> Self { Self { tx } }
}

impl SubmissionBoundary for ChannelSubmitter {
    fn submit(&mut self, submission: Submission) -> Result<(), SubmitError> {
        validate(&submission)?;
        self.tx.try_send(submission).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::ChannelClosed,
        })
    }
}

#[derive(Debug, Clone)]
struct Resting { order_id: OrderId, side: Side, price: i64, remaining: i64 }

/// Logical matching venue: rests orders, fills against level 0 of the opposite
/// side, and shares that level's size across everything it fills on one view.
#[derive(Debug, Default)]
pub struct SimVenue {
    market: MarketView,
    resting: Vec<Resting>,
    bid_taken: i64,
    ask_taken: i64,
}

impl SimVenue {
    pub fn new() -> Self { Self::default() }

    #[cfg(test)]
    pub fn resting_count(&self) -> usize { self.resting.len() }

    pub fn on_submission(&mut self, submission: Submission) -> Vec<OrderAck> {
        if let Err(e) = validate(&submission) {
            warn!(%e, "venue: reject");
            let id = match submission { Submission::Create { order_id, .. } | Submission::Cancel { order_id } => order_id };
            return vec![OrderAck::reject(id)];
        }
        match submission {
            Submission::Create { order_id, side, quantity, price } => {
                self.resting.push(Resting { order_id, side, price, remaining: quantity });
                self.sweep()
            }
            Submission::Cancel { order_id } => match self.resting.iter().position(|r| r.order_id == order_id) {
                Some(pos) => {
                    self.resting.remove(pos);
                    vec![OrderAck::cancel(order_id)]
                }
                None => {
                    debug!(%order_id, "venue: cancel for order no longer resting");
                    Vec::new()
                }
            },
        }
    }

    pub fn on_market(&mut self, view: MarketView) -> Vec<OrderAck> {
        self.market = view;
        self.bid_taken = 0;
        self.ask_taken = 0;
        self.sweep()
    }

    fn sweep(&mut self) -> Vec<OrderAck> {
        let mut acks = Vec::new();
        let (bid, ask) = (self.market.best_bid(), self.market.best_ask());
        for r in self.resting.iter_mut() {
            let (avail, taken) = match (r.side, bid, ask) {
                (Side::Buy, _, Some(a)) if r.price >= a.price => (a.quantity - self.ask_taken, &mut self.ask_taken),
                (Side::Sell, Some(b), _) if r.price <= b.price => (b.quantity - self.bid_taken, &mut self.bid_taken),
                _ => continue,
            };
            let qty = r.remaining.min(avail);
            if qty <= 0 {
                continue;
            }
            *taken += qty;
            r.remaining -= qty;
            acks.push(OrderAck::fill(r.order_id, qty));
        }
        self.resting.retain(|r| r.remaining > 0);
        acks
    }
}

/// Venue task: submissions in, market views in, acknowledgements out.
pub async fn run_venue(
    mut sub_rx: mpsc::Receiver<Submission>,
    mut md_rx: broadcast::Receiver<MarketView>,
    ack_tx: mpsc::Sender<OrderAck>,
    venue: String,
) {
    let mut sim = SimVenue::new();
    loop {
        let acks = tokio::select! {
            maybe_sub = sub_rx.recv() => match maybe_sub {
                Some(sub) => sim.on_submission(sub),
                None => break,
            },
            md = md_rx.recv() => match md {
                Ok(view) => sim.on_market(view),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(n, %venue, "venue: md lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        for ack in acks {
            EXECS.with_label_values(&[ack.kind.label(), &venue]).inc();
            if ack_tx.send(ack).await.is_err() {
                warn!(%venue, "venue: ack channel closed");
                return;
            }
        }
    }
    debug!(%venue, "venue: stopped");
}
