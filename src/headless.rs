//! Windowless mode: consume statuses and log every transition.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{DetectorError, Result};
use crate::mouth::Status;
use crate::status_queue::StatusQueue;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_PAUSE: Duration = Duration::from_millis(50);

/// Counts of what the watcher saw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub received: u64,
    pub transitions: u64,
    pub last: Option<Status>,
}

impl WatchSummary {
    /// Records a status; returns `true` when it differs from the previous one.
    pub fn observe(&mut self, status: Status) -> bool {
        self.received += 1;
        let changed = self.last != Some(status);
        if changed {
            self.transitions += 1;
            self.last = Some(status);
        }
        changed
    }
}

fn record(summary: &mut WatchSummary, status: Status) {
    if summary.observe(status) {
        info!("Status: {}", status);
    }
}

/// Counts whatever is still queued without waiting.
pub fn drain_remaining(queue: &StatusQueue, summary: &mut WatchSummary) {
    while let Some(status) = queue.try_pop() {
        record(summary, status);
    }
}

/// Logs status transitions until the worker thread finishes.
pub fn watch(queue: &StatusQueue, worker: JoinHandle<Result<()>>) -> Result<WatchSummary> {
    let mut summary = WatchSummary::default();

    loop {
        match queue.pop_timeout(POLL_TIMEOUT) {
            Some(status) => record(&mut summary, status),
            None => {
                if worker.is_finished() {
                    // statuses pushed between the timeout and the check
                    drain_remaining(queue, &mut summary);
                    break;
                }
                thread::sleep(POLL_PAUSE);
            }
        }
    }

    info!(
        "Saw {} status(es), {} transition(s), {} dropped",
        summary.received,
        summary.transitions,
        queue.dropped()
    );

    match worker.join() {
        Ok(result) => result.map(|_| summary),
        Err(_) => {
            warn!("Video worker panicked");
            Err(DetectorError::Camera("video worker panicked".to_string()))
        }
    }
}
