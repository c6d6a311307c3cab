//! CasPool artifact emitter
//!
//! Shapes one node allocation into the `CasPool` record the external
//! template engine consumes to create the pool deployment and its CStorPool
//! object. Responsibility stops at input shaping; nothing here talks to the
//! data plane.

use serde::Serialize;
use tracing::info;

use crate::crd::{PoolType, StoragePoolClaim};
use crate::domain::ports::CasPoolSink;
use crate::error::{Error, Result};
use crate::pool::select::Allocation;

/// Contract handed to the pool template engine, one per provisioned pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CasPool {
    /// Owning claim.
    pub storage_pool_claim: String,
    /// RAID layout of the pool.
    pub pool_type: String,
    /// Disk family, `disk` or `sparse`.
    pub r#type: String,
    /// Node the pool lands on.
    pub node_name: String,
    /// Disk names grouped per top-level vdev, selector order preserved.
    pub disk_groups: Vec<Vec<String>>,
    /// Device id resolved for each disk, aligned with `disk_groups`.
    pub device_id_groups: Vec<Vec<String>>,
    /// Namespace the pool deployment is created in.
    pub namespace: String,
    /// Service account the pool deployment runs under.
    pub service_account: String,
}

/// Deployment-side settings the emitter stamps onto every CasPool.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub namespace: String,
    pub service_account: String,
}

pub struct CasPoolEmitter<'a, S: CasPoolSink + ?Sized> {
    sink: &'a S,
    config: &'a EmitterConfig,
}

impl<'a, S: CasPoolSink + ?Sized> CasPoolEmitter<'a, S> {
    pub fn new(sink: &'a S, config: &'a EmitterConfig) -> Self {
        Self { sink, config }
    }

    /// Shape one allocation and hand it to the sink.
    pub async fn emit(&self, spc: &StoragePoolClaim, allocation: &Allocation) -> Result<CasPool> {
        let pool = build_cas_pool(spc, allocation, self.config)?;
        self.sink.dispatch(&pool).await?;
        info!(
            spc = %pool.storage_pool_claim,
            node = %pool.node_name,
            groups = pool.disk_groups.len(),
            "dispatched pool provisioning request"
        );
        Ok(pool)
    }
}

pub fn build_cas_pool(
    spc: &StoragePoolClaim,
    allocation: &Allocation,
    config: &EmitterConfig,
) -> Result<CasPool> {
    let name = spc
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::Internal("claim has no name".to_string()))?;
    let pool_type = spc.pool_type().ok_or_else(|| Error::FatalConfig(format!(
        "claim {name} carries unknown pool type {:?}",
        spc.spec.pool_spec.pool_type
    )))?;

    let disk_groups: Vec<Vec<String>> = allocation
        .disk_groups
        .iter()
        .map(|g| g.iter().map(|d| d.name.clone()).collect())
        .collect();
    let device_id_groups: Vec<Vec<String>> = allocation
        .disk_groups
        .iter()
        .map(|g| g.iter().map(|d| d.device_id.clone()).collect())
        .collect();

    Ok(CasPool {
        storage_pool_claim: name,
        pool_type: pool_type.as_str().to_string(),
        r#type: spc.spec.r#type.clone(),
        node_name: allocation.host.clone(),
        disk_groups,
        device_id_groups,
        namespace: config.namespace.clone(),
        service_account: config.service_account.clone(),
    })
}

// Sanity: every emitted group must match the claim's group size.
pub fn groups_match_layout(pool: &CasPool, pool_type: PoolType) -> bool {
    pool.disk_groups
        .iter()
        .all(|g| g.len() == pool_type.default_disk_count())
}
