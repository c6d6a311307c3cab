//! Work queue
//!
//! FIFO of claim keys with the semantics the workers rely on: a key is never
//! handed to two workers at once, re-adds of an in-flight key are parked and
//! redelivered after completion, and failed items requeue with exponential
//! backoff up to a bounded retry count.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::crd::StoragePoolClaim;

/// Event classification carried alongside the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Add,
    Update,
    Sync,
    Ignore,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Add => "add",
            EventType::Update => "update",
            EventType::Sync => "sync",
            EventType::Ignore => "ignore",
        }
    }
}

/// One unit of work: the claim key, how it got here, and the object snapshot
/// taken at classification time.
#[derive(Debug, Clone)]
pub struct QueueLoad {
    pub key: String,
    pub event: EventType,
    pub object: Option<StoragePoolClaim>,
}

impl QueueLoad {
    pub fn ignore() -> QueueLoad {
        QueueLoad {
            key: String::new(),
            event: EventType::Ignore,
            object: None,
        }
    }
}

/// Attempts after which a failing key is dropped with a log line.
pub const MAX_RETRIES: u32 = 5;

const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff before the nth retry (1-based).
pub fn retry_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    BASE_DELAY
        .saturating_mul(2u32.saturating_pow(exp))
        .min(MAX_DELAY)
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<QueueLoad>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    parked: HashMap<String, QueueLoad>,
    retries: HashMap<String, u32>,
    shut_down: bool,
}

pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<WorkQueue> {
        Arc::new(WorkQueue {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a work item. Ignore items are dropped at the door; a key
    /// already queued keeps its position but gets the fresher snapshot; a
    /// key in flight is parked and redelivered once the worker finishes.
    pub fn push(&self, load: QueueLoad) {
        if load.event == EventType::Ignore || load.key.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return;
        }
        if inner.in_flight.contains(&load.key) {
            inner.parked.insert(load.key.clone(), load);
            return;
        }
        if inner.queued.contains(&load.key) {
            if let Some(existing) = inner.queue.iter_mut().find(|l| l.key == load.key) {
                *existing = load;
            }
            return;
        }
        inner.queued.insert(load.key.clone());
        inner.queue.push_back(load);
        drop(inner);
        self.notify.notify_one();
    }

    /// Take the next item, waiting until one arrives or the token fires.
    /// `None` means shutdown.
    pub async fn recv(&self, cancel: &CancellationToken) -> Option<QueueLoad> {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.shut_down {
                    return None;
                }
                if let Some(load) = inner.queue.pop_front() {
                    inner.queued.remove(&load.key);
                    inner.in_flight.insert(load.key.clone());
                    return Some(load);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Mark a key successfully processed and release anything parked on it.
    pub fn done(&self, key: &str) {
        let parked = {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(key);
            inner.retries.remove(key);
            inner.parked.remove(key)
        };
        if let Some(load) = parked {
            self.push(load);
        }
    }

    /// Requeue a failed item with backoff. Returns false when the retry
    /// budget is spent and the item is dropped.
    pub fn requeue(self: &Arc<Self>, load: QueueLoad) -> bool {
        let attempt = {
            let mut inner = self.inner.lock();
            inner.in_flight.remove(&load.key);
            let attempt = inner.retries.entry(load.key.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };
        if attempt > MAX_RETRIES {
            warn!(key = %load.key, attempts = attempt, "retry budget exhausted, dropping item");
            self.inner.lock().retries.remove(&load.key);
            return false;
        }
        let queue = Arc::clone(self);
        let delay = retry_delay(attempt);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.push(load);
        });
        true
    }

    /// Stop accepting work and wake every waiting worker.
    pub fn shut_down(&self) {
        self.inner.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SpcDisks, StoragePoolClaimSpec};

    fn load(key: &str, event: EventType) -> QueueLoad {
        QueueLoad {
            key: key.to_string(),
            event,
            object: Some(StoragePoolClaim::new(
                key,
                StoragePoolClaimSpec {
                    r#type: "disk".to_string(),
                    max_pools: Some(1),
                    pool_spec: Default::default(),
                    disks: SpcDisks::default(),
                },
            )),
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let q = WorkQueue::new();
        let cancel = CancellationToken::new();
        q.push(load("pool1", EventType::Add));
        q.push(load("pool2", EventType::Add));
        assert_eq!(q.recv(&cancel).await.unwrap().key, "pool1");
        assert_eq!(q.recv(&cancel).await.unwrap().key, "pool2");
    }

    #[tokio::test]
    async fn ignore_items_are_dropped() {
        let q = WorkQueue::new();
        q.push(QueueLoad::ignore());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn queued_duplicate_keeps_one_slot_with_fresh_snapshot() {
        let q = WorkQueue::new();
        let cancel = CancellationToken::new();
        q.push(load("pool1", EventType::Add));
        q.push(load("pool1", EventType::Update));
        assert_eq!(q.len(), 1);
        let got = q.recv(&cancel).await.unwrap();
        assert_eq!(got.event, EventType::Update);
    }

    #[tokio::test]
    async fn in_flight_key_is_parked_until_done() {
        let q = WorkQueue::new();
        let cancel = CancellationToken::new();
        q.push(load("pool1", EventType::Add));
        let first = q.recv(&cancel).await.unwrap();
        q.push(load("pool1", EventType::Sync));
        // parked, not queued
        assert!(q.is_empty());
        q.done(&first.key);
        let redelivered = q.recv(&cancel).await.unwrap();
        assert_eq!(redelivered.key, "pool1");
        assert_eq!(redelivered.event, EventType::Sync);
    }

    #[tokio::test]
    async fn requeue_gives_up_after_bounded_retries() {
        let q = WorkQueue::new();
        for attempt in 1..=MAX_RETRIES {
            assert!(q.requeue(load("pool1", EventType::Sync)), "attempt {attempt}");
        }
        assert!(!q.requeue(load("pool1", EventType::Sync)));
    }

    #[tokio::test]
    async fn success_resets_the_retry_budget() {
        let q = WorkQueue::new();
        for _ in 1..=MAX_RETRIES {
            assert!(q.requeue(load("pool1", EventType::Sync)));
        }
        q.done("pool1");
        assert!(q.requeue(load("pool1", EventType::Sync)));
    }

    #[tokio::test]
    async fn cancellation_unblocks_recv() {
        let q = WorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(q.recv(&cancel).await.is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_millis(200));
        assert_eq!(retry_delay(2), Duration::from_millis(400));
        assert_eq!(retry_delay(3), Duration::from_millis(800));
        assert_eq!(retry_delay(30), Duration::from_secs(30));
    }
}
