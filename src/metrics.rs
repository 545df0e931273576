// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{info, warn};

// Single custom registry (everything is registered here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Inbound --------
pub static MARKET_UPDATES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("market_updates_total", "market views applied to the book").unwrap());

pub static ACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("acks_total", "order acknowledgements received"), &["kind"]).unwrap()
});

pub static LIFECYCLE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("lifecycle_errors_total", "acks refused or dropped (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

// -------- Evaluation --------
pub static EVALUATIONS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("evaluations_total", "policy invocations").unwrap());

pub static GATE_SKIPS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("gate_skips_total", "cycles skipped by the run trigger").unwrap());

pub static POLICY_PANICS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("policy_panics_total", "policy evaluations that panicked").unwrap());

pub static ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("actions_total", "actions handed to the boundary"), &["kind"]).unwrap()
});

pub static SUBMIT_REJECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("submit_rejects_total", "submissions refused by the boundary").unwrap());

// -------- Venue --------
pub static EXECS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("exec_reports_total", "execution reports"), &["status", "venue"]).unwrap()
});

// -------- Book --------
pub static ORDERS_ACTIVE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("orders_active", "orders in NEW or PARTIALLY_FILLED").unwrap());

pub static ORDERS_TOTAL: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("orders_total", "records in the audit trail").unwrap());

fn collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(MARKET_UPDATES.clone()),
        Box::new(ACKS.clone()),
        Box::new(LIFECYCLE_ERRORS.clone()),
        Box::new(EVALUATIONS.clone()),
        Box::new(GATE_SKIPS.clone()),
        Box::new(POLICY_PANICS.clone()),
        Box::new(ACTIONS.clone()),
        Box::new(SUBMIT_REJECTS.clone()),
        Box::new(EXECS.clone()),
        Box::new(ORDERS_ACTIVE.clone()),
        Box::new(ORDERS_TOTAL.clone()),
    ]
}

/// Registers every collector; `AlreadyReg` is not an error, anything else is returned.
fn register_into(registry: &Registry) -> Vec<prometheus::Error> {
    collectors()
        .into_iter()
        .filter_map(|c| match registry.register(c) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => None,
            Err(e) => Some(e),
        })
        .collect()
}

pub fn init() {
    for e in register_into(&REGISTRY) {
        warn!(%e, "metrics: register failed");
    }
}

// Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// One request per connection, headers are not parsed
fn handle_client(mut stream: TcpStream) {
    let mut req = [0u8; 1024];
    let _ = stream.read(&mut req);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Binds `0.0.0.0:port` and answers scrapes from a dedicated OS thread.
pub fn serve_metrics(port: u16) -> io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)?;
    info!(%addr, "metrics listening (/ and /metrics)");
    thread::spawn(move || {
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => warn!(%e, "metrics accept error"),
            }
        }
    });
    Ok(())
}
