//! Bounded async write buffer.
//!
//! Producers offer records without blocking; a full queue drops the record
//! and bumps a counter. A single background worker drains the queue and
//! flushes newline-delimited JSON batches - when the batch reaches the size
//! threshold or its oldest record ages past the flush interval - to a
//! timestamped file, fsyncing after each batch. Shutdown drains whatever
//! remains before returning.

use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffer tuning.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Queue capacity; offers beyond it are dropped.
    pub capacity: usize,
    /// Flush when this many records have accumulated.
    pub batch_size: usize,
    /// Flush when the oldest buffered record is older than this.
    pub flush_interval: Duration,
    /// Directory receiving `alerts_<timestamp>.jsonl` files.
    pub storage_dir: PathBuf,
}

impl BufferConfig {
    pub fn new(storage_dir: PathBuf) -> Self {
        Self {
            capacity: 2_000,
            batch_size: 1_000,
            flush_interval: Duration::from_secs(5),
            storage_dir,
        }
    }
}

/// Counters for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub accepted: u64,
    pub dropped: u64,
    pub written: u64,
    pub batches_flushed: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    batches: AtomicU64,
}

/// Best-effort durable sink for accepted alerts. Callers needing stronger
/// guarantees use the registry path instead.
pub struct AlertBuffer {
    tx: mpsc::Sender<serde_json::Value>,
    shutdown_tx: broadcast::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl AlertBuffer {
    /// Create the buffer and spawn its single background writer.
    pub fn start(config: BufferConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.storage_dir)?;

        let (tx, rx) = mpsc::channel(config.capacity);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let counters = Arc::new(Counters::default());

        let worker = tokio::spawn(writer_loop(config, rx, shutdown_rx, Arc::clone(&counters)));
        info!("alert buffer writer started");

        Ok(Self {
            tx,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Non-blocking offer. A full (or stopped) queue drops the record.
    pub fn offer(&self, record: serde_json::Value) {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "alert buffer full, dropping record");
            }
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            batches_flushed: self.counters.batches.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting, drain the queue synchronously and wait for the
    /// worker to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "alert buffer worker failed during shutdown");
            }
        }
        info!("alert buffer drained and stopped");
    }
}

async fn writer_loop(
    config: BufferConfig,
    mut rx: mpsc::Receiver<serde_json::Value>,
    mut shutdown_rx: broadcast::Receiver<()>,
    counters: Arc<Counters>,
) {
    let mut batch: Vec<serde_json::Value> = Vec::with_capacity(config.batch_size);
    let mut oldest: Option<Instant> = None;
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(record) => {
                        if batch.is_empty() {
                            oldest = Some(Instant::now());
                        }
                        batch.push(record);
                    }
                    // All senders dropped; drain is complete.
                    None => break,
                }
            }
            _ = tick.tick() => {}
            _ = shutdown_rx.recv() => {
                // Drain whatever is still queued, then flush and exit.
                while let Ok(record) = rx.try_recv() {
                    batch.push(record);
                }
                flush(&config, &mut batch, &counters);
                return;
            }
        }

        let age_exceeded = oldest
            .map(|at| at.elapsed() >= config.flush_interval)
            .unwrap_or(false);
        if batch.len() >= config.batch_size || (!batch.is_empty() && age_exceeded) {
            flush(&config, &mut batch, &counters);
            oldest = None;
        }
    }

    flush(&config, &mut batch, &counters);
}

fn flush(config: &BufferConfig, batch: &mut Vec<serde_json::Value>, counters: &Counters) {
    if batch.is_empty() {
        return;
    }

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = config.storage_dir.join(format!("alerts_{timestamp}.jsonl"));

    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for record in batch.iter() {
            serde_json::to_writer(&mut file, record)?;
            file.write_all(b"\n")?;
        }
        file.sync_all()
    })();

    match result {
        Ok(()) => {
            counters
                .written
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            counters.batches.fetch_add(1, Ordering::Relaxed);
            debug!(count = batch.len(), path = %path.display(), "alert batch flushed");
        }
        Err(e) => {
            error!(error = %e, path = %path.display(), "alert batch flush failed");
        }
    }
    batch.clear();
}
