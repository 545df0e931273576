// ===============================
// src/main.rs
// ===============================
/*
 # run against the simulated venue, one policy preset
 RUST_LOG=info POLICY=market_maker RECORD_FILE=data/events.jsonl cargo run

 # what the engine has been doing
 curl -s localhost:9898/metrics | egrep '^(actions_total|acks_total|orders_)'
*/
mod book;
mod config;
mod cycle;
mod domain;
mod feed;
mod gateway;
mod metrics;
mod order;
mod policy;
mod recorder;
mod risk;

use tokio::{
    select,
    sync::{broadcast, mpsc},
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::book::BookState;
use crate::cycle::{CycleOutcome, EvaluationCycle, InboundEvent};
use crate::domain::{Event, MarketView, OrderAck, Submission};
use crate::gateway::ChannelSubmitter;
use crate::policy::DecisionPolicy;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Config ----
    let (args, policy) = match config::load() {
        Ok(v) => v,
        Err(e) => {
            error!(%e, "invalid configuration");
            std::process::exit(2);
        }
    };
    info!(
        symbol = %args.symbol,
        instrument_id = args.instrument_id,
        policy = policy.name(),
        thresholds = ?policy.config(),
        feed_interval_ms = args.feed_interval_ms,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    if let Err(e) = metrics::serve_metrics(args.metrics_port) {
        warn!(%e, port = args.metrics_port, "metrics endpoint disabled");
    }

    // ---- Buses ----
    let (md_tx, _) = broadcast::channel::<MarketView>(4096);
    let (sub_tx, sub_rx) = mpsc::channel::<Submission>(1024);
    let (ack_tx, mut ack_rx) = mpsc::channel::<OrderAck>(4096);

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let rec_task = args.record_file.clone().map(|path| tokio::spawn(recorder::run(rec_rx, path)));

    // ---- Venue ----
    tokio::spawn(gateway::run_venue(sub_rx, md_tx.subscribe(), ack_tx, "SIM".to_string()));

    // ---- Feed ----
    let mut md_rx = md_tx.subscribe();
    let mock = feed::MockFeed::new(args.symbol.clone(), args.instrument_id, 100, rand::random());
    tokio::spawn(feed::run_mock(md_tx, mock, Duration::from_millis(args.feed_interval_ms)));

    // ---- Engine (single task owns the book) ----
    let state = BookState::new(args.symbol.clone(), args.instrument_id);
    let mut engine = EvaluationCycle::new(state, policy, ChannelSubmitter::new(sub_tx));

    let mut heartbeat = interval(Duration::from_secs(1));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut updates: u64 = 0;
    let mut acks: u64 = 0;

    let _ = rec_tx.try_send(Event::Note(format!("start policy={}", engine.policy().name())));
    loop {
        let outcome = select! {
            md = md_rx.recv() => match md {
                Ok(view) => {
                    updates += 1;
                    let _ = rec_tx.try_send(Event::Md(view.clone()));
                    engine.on_event(InboundEvent::Market(view))
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(n, "engine: md lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(first) = ack_rx.recv() => {
                // drain what is already queued, evaluate once
                let mut batch = vec![first];
                while let Ok(ack) = ack_rx.try_recv() {
                    batch.push(ack);
                }
                acks += batch.len() as u64;
                for ack in &batch {
                    let _ = rec_tx.try_send(Event::Ack(*ack));
                }
                engine.on_batch(batch.into_iter().map(InboundEvent::Ack))
            },
            _ = heartbeat.tick() => {
                let state = engine.state();
                info!(updates, acks, active = state.active_count(), total = state.all_orders().len(), "heartbeat");
                updates = 0;
                acks = 0;
                continue;
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        };
        if let CycleOutcome::Dispatched(sub) = outcome {
            let _ = rec_tx.try_send(Event::Act(sub));
        }
    }

    let state = engine.state();
    info!(total = state.all_orders().len(), active = state.active_count(), "engine stopped");
    let _ = rec_tx.try_send(Event::Note("stop".to_string()));
    drop(rec_tx);
    if let Some(task) = rec_task {
        let _ = task.await;
    }
}
