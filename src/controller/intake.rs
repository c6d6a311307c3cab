//! Event intake
//!
//! Classifies watch events on StoragePoolClaims into work items and feeds
//! the shared queue. A local snapshot cache supplies the previous object
//! version for update classification and drives the periodic resync that
//! bounds convergence after missed events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::queue::{EventType, QueueLoad, WorkQueue};
use crate::crd::{StoragePoolClaim, RECONCILE_DISABLE_ANNOTATION};
use crate::domain::ports::EventRecorder;
use crate::error::Result;

/// Work item for a newly observed claim.
pub fn classify_add(spc: &StoragePoolClaim) -> QueueLoad {
    QueueLoad {
        key: spc.metadata.name.clone().unwrap_or_default(),
        event: EventType::Add,
        object: Some(spc.clone()),
    }
}

/// Work item for an observed mutation. A scheduled deletion is ignored
/// outright; otherwise an unchanged resource version marks a resync
/// delivery and a changed one a genuine update.
pub fn classify_update(old: &StoragePoolClaim, new: &StoragePoolClaim) -> QueueLoad {
    if new.metadata.deletion_timestamp.is_some() {
        return QueueLoad::ignore();
    }
    let event = if old.metadata.resource_version == new.metadata.resource_version {
        EventType::Sync
    } else {
        EventType::Update
    };
    QueueLoad {
        key: new.metadata.name.clone().unwrap_or_default(),
        event,
        object: Some(new.clone()),
    }
}

pub struct Intake {
    queue: Arc<WorkQueue>,
    cache: Mutex<HashMap<String, StoragePoolClaim>>,
    relist_seen: Mutex<Option<HashSet<String>>>,
    recorder: Option<Arc<dyn EventRecorder>>,
}

impl Intake {
    pub fn new(queue: Arc<WorkQueue>) -> Arc<Intake> {
        Arc::new(Intake {
            queue,
            cache: Mutex::new(HashMap::new()),
            relist_seen: Mutex::new(None),
            recorder: None,
        })
    }

    /// Intake that also records a warning event on every claim it drops at
    /// the reconcile-disable gate.
    pub fn with_recorder(queue: Arc<WorkQueue>, recorder: Arc<dyn EventRecorder>) -> Arc<Intake> {
        Arc::new(Intake {
            queue,
            cache: Mutex::new(HashMap::new()),
            relist_seen: Mutex::new(None),
            recorder: Some(recorder),
        })
    }

    pub fn observe(&self, event: watcher::Event<StoragePoolClaim>) {
        match event {
            watcher::Event::Init => {
                *self.relist_seen.lock() = Some(HashSet::new());
            }
            watcher::Event::InitApply(spc) => {
                if let (Some(seen), Some(name)) =
                    (self.relist_seen.lock().as_mut(), spc.metadata.name.clone())
                {
                    seen.insert(name);
                }
                self.handle_apply(spc);
            }
            watcher::Event::InitDone => {
                // drop cache entries the relist no longer returned
                if let Some(seen) = self.relist_seen.lock().take() {
                    self.cache.lock().retain(|k, _| seen.contains(k));
                }
            }
            watcher::Event::Apply(spc) => self.handle_apply(spc),
            watcher::Event::Delete(spc) => self.handle_delete(&spc),
        }
    }

    fn handle_apply(&self, spc: StoragePoolClaim) {
        let Some(name) = spc.metadata.name.clone() else {
            return;
        };
        if spc.reconcile_disabled() {
            warn!(
                spc = %name,
                "reconcile is disabled via {:?} annotation",
                RECONCILE_DISABLE_ANNOTATION
            );
            if let Some(recorder) = &self.recorder {
                let recorder = Arc::clone(recorder);
                let dropped = spc.clone();
                tokio::spawn(async move {
                    recorder
                        .warn(
                            &dropped,
                            "ReconcileDisabled",
                            "event dropped, reconciliation is disabled via annotation",
                        )
                        .await;
                });
            }
            self.cache.lock().insert(name, spc);
            return;
        }
        let old = self.cache.lock().insert(name, spc.clone());
        let load = match old {
            None => classify_add(&spc),
            Some(old) => classify_update(&old, &spc),
        };
        debug!(key = %load.key, event = load.event.as_str(), "queueing claim");
        self.queue.push(load);
    }

    /// Deletions are not work: the pool teardown path is driven by the
    /// object's own lifecycle, not by this queue.
    fn handle_delete(&self, spc: &StoragePoolClaim) {
        if let Some(name) = spc.metadata.name.as_deref() {
            self.cache.lock().remove(name);
            debug!(spc = %name, "claim deleted, dropped from cache");
        }
    }

    /// Emit a sync item for every cached claim.
    pub fn resync(&self) {
        let snapshot: Vec<StoragePoolClaim> = self.cache.lock().values().cloned().collect();
        for spc in snapshot {
            if spc.reconcile_disabled() {
                continue;
            }
            self.queue.push(QueueLoad {
                key: spc.metadata.name.clone().unwrap_or_default(),
                event: EventType::Sync,
                object: Some(spc),
            });
        }
    }

    #[cfg(test)]
    fn cached(&self, name: &str) -> Option<StoragePoolClaim> {
        self.cache.lock().get(name).cloned()
    }
}

/// Pump the watch stream into the intake until cancelled.
pub async fn watch_claims(
    api: Api<StoragePoolClaim>,
    intake: Arc<Intake>,
    cancel: CancellationToken,
) -> Result<()> {
    let stream = watcher(api, watcher::Config::default());
    let mut stream = std::pin::pin!(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("claim watch stopped");
                return Ok(());
            }
            event = stream.next() => match event {
                Some(Ok(ev)) => intake.observe(ev),
                Some(Err(e)) => warn!(error = %e, "claim watch error, stream will retry"),
                None => {
                    info!("claim watch stream ended");
                    return Ok(());
                }
            }
        }
    }
}

/// Fire [`Intake::resync`] every `period` until cancelled.
pub async fn resync_loop(intake: Arc<Intake>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately, skip it
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => intake.resync(),
        }
    }
}
