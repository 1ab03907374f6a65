//! Bounded hand-off of statuses from the video worker to the UI.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::mouth::Status;

/// What the producer does with a new status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum QueuePolicy {
    /// Enqueue every frame's status, evicting the oldest when full.
    #[default]
    Always,
    /// Enqueue only when the status differs from the last one enqueued.
    OnChange,
    /// Keep a single slot and overwrite it.
    Latest,
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueuePolicy::Always => "always",
            QueuePolicy::OnChange => "on-change",
            QueuePolicy::Latest => "latest",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Status>,
    last_pushed: Option<Status>,
    dropped: u64,
}

/// Thread-safe bounded FIFO of statuses.
#[derive(Debug)]
pub struct StatusQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
    policy: QueuePolicy,
}

impl StatusQueue {
    pub fn new(capacity: usize, policy: QueuePolicy) -> Self {
        let capacity = match policy {
            QueuePolicy::Latest => 1,
            _ => capacity.max(1),
        };

        Self {
            inner: Mutex::new(Inner::default()),
            available: Condvar::new(),
            capacity,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers a status to the queue. Returns `false` if the policy skipped it.
    pub fn push(&self, status: Status) -> bool {
        let mut inner = self.lock();

        if self.policy == QueuePolicy::OnChange && inner.last_pushed == Some(status) {
            return false;
        }

        while inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
        }

        inner.items.push_back(status);
        inner.last_pushed = Some(status);
        drop(inner);

        self.available.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<Status> {
        self.lock().items.pop_front()
    }

    /// Waits up to `timeout` for a status.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Status> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();

        loop {
            if let Some(status) = inner.items.pop_front() {
                return Some(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Empties the queue and returns the newest status, if any.
    pub fn drain_latest(&self) -> Option<Status> {
        self.lock().items.drain(..).last()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of statuses evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Forgets queued items and the debounce memory.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.last_pushed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn always_keeps_fifo_order() {
        let queue = StatusQueue::new(4, QueuePolicy::Always);
        assert!(queue.push(Status::Sus));
        assert!(queue.push(Status::Hehe));
        assert!(queue.push(Status::Hehe));

        assert_eq!(queue.try_pop(), Some(Status::Sus));
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = StatusQueue::new(2, QueuePolicy::Always);
        queue.push(Status::Sus);
        queue.push(Status::Sus);
        queue.push(Status::Hehe);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(Status::Sus));
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
    }

    #[test]
    fn on_change_debounces_repeats() {
        let queue = StatusQueue::new(8, QueuePolicy::OnChange);
        assert!(queue.push(Status::Sus));
        assert!(!queue.push(Status::Sus));
        assert!(queue.push(Status::Hehe));
        assert!(!queue.push(Status::Hehe));
        assert!(queue.push(Status::Sus));

        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn on_change_remembers_across_pops() {
        let queue = StatusQueue::new(8, QueuePolicy::OnChange);
        queue.push(Status::Hehe);
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
        assert!(!queue.push(Status::Hehe));

        queue.clear();
        assert!(queue.push(Status::Hehe));
    }

    #[test]
    fn latest_overwrites_single_slot() {
        let queue = StatusQueue::new(10, QueuePolicy::Latest);
        assert_eq!(queue.capacity(), 1);

        queue.push(Status::Sus);
        queue.push(Status::Hehe);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue = StatusQueue::new(0, QueuePolicy::Always);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push(Status::Sus));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_latest_returns_newest_and_empties() {
        let queue = StatusQueue::new(5, QueuePolicy::Always);
        assert_eq!(queue.drain_latest(), None);

        queue.push(Status::Hehe);
        queue.push(Status::Hehe);
        queue.push(Status::Sus);

        assert_eq!(queue.drain_latest(), Some(Status::Sus));
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_expires_on_empty_queue() {
        let queue = StatusQueue::new(1, QueuePolicy::Always);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let queue = Arc::new(StatusQueue::new(4, QueuePolicy::Always));
        let producer = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(Status::Hehe);
        });

        assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Some(Status::Hehe));
        handle.join().unwrap();
    }

    #[test]
    fn policy_names() {
        assert_eq!(QueuePolicy::OnChange.to_string(), "on-change");
        assert_eq!(QueuePolicy::default(), QueuePolicy::Always);
    }
}
