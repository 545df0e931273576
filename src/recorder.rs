// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder: one stamped `Event` per line, appended.
// Flushes every second and every 1000 events; reopens the file once on a
// failed write. Enabled by RECORD_FILE (see main.rs).
//
use chrono::Utc;
use serde::Serialize;
use std::io;
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

/// Wall-clock stamp is added here only; the engine never reads a clock.
#[derive(Serialize)]
struct Line<'a> {
    ts_ns: i64,
    #[serde(flatten)]
    event: &'a Event,
}

fn encode(ev: &Event) -> serde_json::Result<String> {
    let ts_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let mut line = serde_json::to_string(&Line { ts_ns, event: ev })?;
    line.push('\n');
    Ok(line)
}

async fn open_writer(path: &str) -> io::Result<BufWriter<fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(%e, %path, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match encode(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(%e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(%e, "recorder: write failed, attempting reopen");
                    writer = match open_writer(&path).await {
                        Ok(w) => w,
                        Err(e) => {
                            error!(%e, %path, "recorder: reopen failed, stopped");
                            return;
                        }
                    };
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        error!(%e, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }
                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }
            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
