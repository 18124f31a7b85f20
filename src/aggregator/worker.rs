//! Periodic flush task
//!
//! One tokio task ticks at the flush interval and runs one flush per tick.
//! Stop is a oneshot observed ahead of any pending tick, so a stop racing
//! a tick never produces an extra flush. A flush already running when stop
//! arrives completes first.

use super::engine::Shared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

/// Owner's handle on the flush task
pub struct FlushWorkerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl FlushWorkerHandle {
    /// Stop ticking and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "flush task ended abnormally");
        }
    }
}

pub(crate) fn spawn_flush_worker(shared: Arc<Shared>, interval: Duration) -> FlushWorkerHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(run(shared, interval, stop_rx));
    FlushWorkerHandle { stop_tx, task }
}

async fn run(shared: Arc<Shared>, interval: Duration, mut stop_rx: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Fires on stop and when the handle is dropped
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let report = shared.flush().await;
                debug!(groups = report.groups, "periodic flush finished");
            }
        }
    }
    debug!("flush task stopped");
}
