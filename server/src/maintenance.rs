//! Periodic maintenance: archive retention and dedup cleanup.
//!
//! The stores perform no background work of their own; this task is the
//! only timer, and it stops at the next interval boundary after shutdown.

use crate::state::SharedState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn spawn_maintenance(state: SharedState) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.server.poll_interval_secs.max(1));
    let mut shutdown_rx = state.shutdown.subscribe();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so start-up stays quick.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let store = state.store.clone();
                    match tokio::task::spawn_blocking(move || store.retention_sweep()).await {
                        Ok(Ok(reaped)) if reaped > 0 => {
                            info!(reaped, "maintenance: archives reaped");
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "maintenance: retention sweep failed"),
                        Err(e) => warn!(error = %e, "maintenance: retention task failed"),
                    }
                    state.dedup.cleanup_expired().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("maintenance task stopping");
                    break;
                }
            }
        }
    })
}
