//! Background workers: periodic read-snapshot regeneration and persistence
//! dumps. Both exit cooperatively when the shutdown signal fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

use crate::mempool::Mempool;

#[cfg(test)]
#[path = "runner_test.rs"]
mod runner_test;

/// Handles to the spawned workers plus their shutdown switch.
pub struct MempoolWorkers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl MempoolWorkers {
    /// Signals shutdown and waits for every worker to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawns the workers the mempool's configuration asks for. Must be called
/// from within a tokio runtime.
pub fn start_workers(mempool: Arc<Mempool>) -> MempoolWorkers {
    let (shutdown, _) = watch::channel(false);
    let mut handles = Vec::new();

    if mempool.config().generate_read_snapshot {
        handles.push(tokio::spawn(snapshot_regenerator(mempool.clone(), shutdown.subscribe())));
    }
    if mempool.config().dump_dir.is_some() {
        handles.push(tokio::spawn(persistence_dumper(mempool.clone(), shutdown.subscribe())));
    }

    MempoolWorkers { shutdown, handles }
}

/// Wakes every regeneration interval and republishes the read snapshot —
/// unless the transaction-count trigger already did so while we slept.
async fn snapshot_regenerator(mempool: Arc<Mempool>, mut shutdown: watch::Receiver<bool>) {
    info!("starting read snapshot regenerator");
    let interval =
        Duration::from_secs_f64(mempool.config().snapshot_regeneration_interval_secs);
    let mut last_seen_sequence = mempool.snapshot_sequence_number();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let current = mempool.snapshot_sequence_number();
                if current == last_seen_sequence {
                    trace!("regenerating read snapshot at the prescribed interval");
                    let mempool = mempool.clone();
                    // The regeneration briefly takes the pool lock; keep it
                    // off the async executor.
                    let _ = tokio::task::spawn_blocking(move || {
                        mempool.regenerate_read_snapshot();
                    })
                    .await;
                } else {
                    trace!("snapshot regenerated while sleeping; nothing to do");
                }
                last_seen_sequence = mempool.snapshot_sequence_number();
            }
            _ = shutdown.changed() => {
                info!("read snapshot regenerator shutting down");
                return;
            }
        }
    }
}

/// Dumps the pool to disk on a fixed cadence.
async fn persistence_dumper(mempool: Arc<Mempool>, mut shutdown: watch::Receiver<bool>) {
    info!("starting mempool persistence dumper");
    let interval = Duration::from_secs(mempool.config().dump_interval_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let mempool = mempool.clone();
                let result = tokio::task::spawn_blocking(move || mempool.dump_to_disk()).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(%err, "mempool dump failed"),
                    Err(err) => error!(%err, "mempool dump task panicked"),
                }
            }
            _ = shutdown.changed() => {
                info!("mempool persistence dumper shutting down");
                return;
            }
        }
    }
}
