//! Sync handler and worker loop
//!
//! The hot path: a worker takes a claim key off the queue, re-reads the
//! claim, validates it, arbitrates the lease, provisions owed pools, and
//! runs the disk-ops pipeline when the disk list changed under the hash
//! annotation.

use std::sync::Arc;

use prometheus::IntCounter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::controller::queue::{EventType, WorkQueue};
use crate::crd::{SpcPhase, StoragePoolClaim, CSP_DISK_HASH_ANNOTATION, CSP_DISK_HASH_PATCH_PATH};
use crate::domain::ports::{
    CasPoolSink, CspStore, DiskInventory, EventRecorder, JsonPatchOp, PodReader, SpcStore,
};
use crate::error::{Error, Result};
use crate::hash;
use crate::lease::{Identity, SpcLease};
use crate::pool::caspool::{CasPoolEmitter, EmitterConfig};
use crate::pool::operations::{self, PoolConfig};
use crate::pool::{math, select};

/// Counters exported on /metrics. Registered against the default registry
/// once at startup.
pub struct Metrics {
    pub reconciles: IntCounter,
    pub reconcile_errors: IntCounter,
    pub pools_provisioned: IntCounter,
    pub disk_ops_runs: IntCounter,
}

impl Metrics {
    pub fn register() -> std::result::Result<Metrics, prometheus::Error> {
        Ok(Metrics {
            reconciles: prometheus::register_int_counter!(
                "spc_operator_reconciles_total",
                "Total number of claim reconciliations"
            )?,
            reconcile_errors: prometheus::register_int_counter!(
                "spc_operator_reconcile_errors_total",
                "Total number of failed claim reconciliations"
            )?,
            pools_provisioned: prometheus::register_int_counter!(
                "spc_operator_pools_provisioned_total",
                "Total number of pool provisioning requests dispatched"
            )?,
            disk_ops_runs: prometheus::register_int_counter!(
                "spc_operator_disk_ops_runs_total",
                "Total number of disk-ops pipeline executions"
            )?,
        })
    }
}

/// Everything one sync needs, shared by all workers.
pub struct SyncContext {
    pub spc_store: Arc<dyn SpcStore>,
    pub csp_store: Arc<dyn CspStore>,
    pub disks: Arc<dyn DiskInventory>,
    pub pods: Arc<dyn PodReader>,
    pub sink: Arc<dyn CasPoolSink>,
    pub recorder: Arc<dyn EventRecorder>,
    pub identity: Identity,
    pub emitter: EmitterConfig,
    pub metrics: Option<Arc<Metrics>>,
}

impl SyncContext {
    /// Reconcile one claim by name. A missing claim, a contended lease, and
    /// a partial selection are all successful outcomes.
    #[instrument(skip(self), fields(spc = %key))]
    pub async fn sync(&self, key: &str) -> Result<()> {
        let Some(spc) = self.spc_store.get(key).await? else {
            info!("claim no longer exists, nothing to do");
            return Ok(());
        };
        if spc.reconcile_disabled() {
            self.recorder
                .warn(&spc, "ReconcileDisabled", "reconciliation is disabled via annotation")
                .await;
            return Ok(());
        }

        if let Err(e) = math::validate(&spc) {
            self.recorder
                .warn(&spc, "ValidationFailed", &e.to_string())
                .await;
            return Err(e);
        }

        let lease = SpcLease::new(&*self.spc_store, &*self.pods, self.identity.clone());
        let held = match lease.hold(&spc).await {
            Ok(held) => held,
            Err(Error::LeaseHeld(holder)) => {
                info!(%holder, "lease held by another replica, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let outcome = self.reconcile(&held).await;
        if let Err(e) = lease.release(&held).await {
            warn!(error = %e, "lease release failed, reaped by the next contender");
        }
        outcome
    }

    async fn reconcile(&self, spc: &StoragePoolClaim) -> Result<()> {
        let name = spc.metadata.name.as_deref().unwrap_or_default();
        let csps = self.csp_store.list_for_claim(name).await?;
        let pending = math::pending_pool_count(spc, csps.len())?;

        if pending > 0 {
            self.provision(spc, pending).await?;
        }

        self.run_disk_ops(spc, csps).await?;
        self.update_phase(spc, pending).await?;
        Ok(())
    }

    /// Ask the selector for up to `pending` allocations and dispatch one
    /// provisioning request per allocation. Per-pool failures are logged
    /// and skipped; the next resync re-attempts the remainder.
    async fn provision(&self, spc: &StoragePoolClaim, pending: usize) -> Result<()> {
        let name = spc.metadata.name.as_deref().unwrap_or_default();
        let inventory = self.disks.list().await?;
        let all_csps = self.csp_store.list_all().await?;
        let allocations = select::select(spc, &inventory, &all_csps, pending)?;

        let emitter = CasPoolEmitter::new(&*self.sink, &self.emitter);
        for (i, allocation) in allocations.iter().enumerate() {
            info!(
                spc = %name,
                pool = i + 1,
                pending,
                node = %allocation.host,
                "provisioning pool"
            );
            match emitter.emit(spc, allocation).await {
                Ok(_) => {
                    if let Some(m) = &self.metrics {
                        m.pools_provisioned.inc();
                    }
                }
                Err(e) => {
                    warn!(spc = %name, node = %allocation.host, error = %e, "pool provisioning failed");
                }
            }
        }
        Ok(())
    }

    /// Run the disk-ops pipeline when the stored hash no longer matches the
    /// disk list, then move the hash annotation forward. The annotation is
    /// only written after every pipeline step persisted, so an abort leaves
    /// the old hash in place and the next reconcile retries.
    async fn run_disk_ops(&self, spc: &StoragePoolClaim, csps: Vec<crate::crd::CStorPool>) -> Result<()> {
        let name = spc.metadata.name.as_deref().unwrap_or_default();
        let new_hash = hash::hash(&spc.spec.disks)?;

        match spc.annotation(CSP_DISK_HASH_ANNOTATION) {
            Some(existing) if existing == new_hash => Ok(()),
            Some(_) => {
                info!(spc = %name, "disk list changed, running disk operations");
                let pc = PoolConfig::new(spc.clone(), csps);
                if let Err(e) = operations::run(pc, &*self.csp_store, &*self.disks).await {
                    self.recorder
                        .warn(spc, "DiskOperationsFailed", &e.to_string())
                        .await;
                    return Err(e);
                }
                if let Some(m) = &self.metrics {
                    m.disk_ops_runs.inc();
                }
                self.spc_store
                    .patch(
                        name,
                        &[JsonPatchOp::replace(CSP_DISK_HASH_PATCH_PATH, new_hash)],
                    )
                    .await
            }
            None => {
                self.spc_store
                    .patch(name, &[JsonPatchOp::add(CSP_DISK_HASH_PATCH_PATH, new_hash)])
                    .await
            }
        }
    }

    /// Keep status.phase in step with the pool debt.
    async fn update_phase(&self, spc: &StoragePoolClaim, pending: usize) -> Result<()> {
        let desired = if pending == 0 {
            SpcPhase::Online
        } else {
            SpcPhase::Pending
        };
        let current = spc.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if current == desired {
            return Ok(());
        }
        let mut updated = spc.clone();
        updated.status = Some(crate::crd::StoragePoolClaimStatus { phase: desired });
        self.spc_store.update_status(&updated).await?;
        Ok(())
    }
}

/// Drain the queue until cancelled. Retryable failures go back with
/// backoff; permanent ones are logged once and dropped.
pub async fn worker(
    id: usize,
    queue: Arc<WorkQueue>,
    ctx: Arc<SyncContext>,
    cancel: CancellationToken,
) {
    info!(worker = id, "worker started");
    while let Some(load) = queue.recv(&cancel).await {
        if load.event == EventType::Ignore {
            queue.done(&load.key);
            continue;
        }
        if let Some(m) = &ctx.metrics {
            m.reconciles.inc();
        }
        match ctx.sync(&load.key).await {
            Ok(()) => queue.done(&load.key),
            Err(e) => {
                if let Some(m) = &ctx.metrics {
                    m.reconcile_errors.inc();
                }
                if e.is_retryable() {
                    warn!(key = %load.key, event = load.event.as_str(), error = %e, "sync failed, requeueing");
                    let key = load.key.clone();
                    if !queue.requeue(load) {
                        error!(key = %key, "sync kept failing, giving up until the next event");
                    }
                } else {
                    error!(key = %load.key, error = %e, "sync failed permanently, not retrying");
                    queue.done(&load.key);
                }
            }
        }
    }
    info!(worker = id, "worker stopped");
}

/// Spawn `count` workers sharing the queue.
pub fn spawn_workers(
    count: usize,
    queue: Arc<WorkQueue>,
    ctx: Arc<SyncContext>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|id| {
            tokio::spawn(worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&ctx),
                cancel.clone(),
            ))
        })
        .collect()
}
