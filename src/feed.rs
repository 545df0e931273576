// ===============================
// src/feed.rs
// ===============================
//
// Mock depth feed: random-walk touch with three levels a side. Now and then the
// instrument goes into auction or halts, or one side of the book empties out.
//
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::domain::{InstrumentStatus, MarketView};

const DEPTH: i64 = 3;
const FLOOR: i64 = 50;

pub struct MockFeed {
    symbol: String,
    instrument_id: u64,
    bid: i64,
    rng: StdRng,
}

impl MockFeed {
    pub fn new(symbol: impl Into<String>, instrument_id: u64, start_bid: i64, seed: u64) -> Self {
        Self { symbol: symbol.into(), instrument_id, bid: start_bid.max(FLOOR), rng: StdRng::seed_from_u64(seed) }
    }

    pub fn next_view(&mut self) -> MarketView {
        self.bid = (self.bid + self.rng.gen_range(-3..=3)).max(FLOOR);
        let spread = self.rng.gen_range(1..=3);
        let mut bids: Vec<(i64, i64)> = (0..DEPTH).map(|i| (self.bid - i, self.rng.gen_range(10..=300))).collect();
        let mut asks: Vec<(i64, i64)> =
            (0..DEPTH).map(|i| (self.bid + spread + i, self.rng.gen_range(10..=300))).collect();

        let mut status = InstrumentStatus::Continuous;
        match self.rng.gen_range(0..100) {
            0 => status = InstrumentStatus::Halted,
            1 => status = InstrumentStatus::Auction,
            2 => bids.clear(),
            3 => asks.clear(),
            _ => {}
        }
        MarketView::new(self.symbol.clone(), self.instrument_id)
            .with_bids(&bids)
            .with_asks(&asks)
            .with_status(status)
    }
}

/// Publishes one view every `every` until all receivers are gone.
pub async fn run_mock(md_tx: broadcast::Sender<MarketView>, mut feed: MockFeed, every: Duration) {
    info!(symbol = %feed.symbol, ?every, "feed: mock started");
    loop {
        let view = feed.next_view();
        if md_tx.send(view).is_err() {
            debug!("feed: no receivers, stopped");
            return;
        }
        sleep(every).await;
    }
}
