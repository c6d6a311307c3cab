//! Kubernetes Adapters
//!
//! Implements the claim, pool, disk and pod ports against the apiserver.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, instrument};

use crate::crd::{CStorPool, Disk, StoragePoolClaim, STORAGE_POOL_CLAIM_LABEL};
use crate::domain::ports::{
    CspStore, DiskInventory, JsonPatchOp, PodObservation, PodReader, SpcStore,
};
use crate::error::{Error, Result};

fn to_json_patch(ops: &[JsonPatchOp]) -> Result<json_patch::Patch> {
    let value = serde_json::Value::Array(
        ops.iter()
            .map(|op| {
                serde_json::json!({
                    "op": op.op.as_str(),
                    "path": op.path,
                    "value": op.value,
                })
            })
            .collect(),
    );
    Ok(serde_json::from_value(value)?)
}

/// StoragePoolClaim access backed by the apiserver. Claims are
/// cluster-scoped.
#[derive(Clone)]
pub struct KubeSpcStore {
    client: Client,
}

impl KubeSpcStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<StoragePoolClaim> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl SpcStore for KubeSpcStore {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Option<StoragePoolClaim>> {
        Ok(self.api().get_opt(name).await?)
    }

    #[instrument(skip(self, spc))]
    async fn create(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim> {
        Ok(self.api().create(&PostParams::default(), spc).await?)
    }

    #[instrument(skip(self, spc))]
    async fn update(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim> {
        let name = spc
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Internal("claim has no name".to_string()))?;
        Ok(self.api().replace(name, &PostParams::default(), spc).await?)
    }

    #[instrument(skip(self, spc))]
    async fn update_status(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim> {
        let name = spc
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Internal("claim has no name".to_string()))?;
        let data = serde_json::to_vec(spc)?;
        Ok(self
            .api()
            .replace_status(name, &PostParams::default(), data)
            .await?)
    }

    #[instrument(skip(self, ops))]
    async fn patch(&self, name: &str, ops: &[JsonPatchOp]) -> Result<()> {
        let patch = to_json_patch(ops)?;
        self.api()
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Json::<StoragePoolClaim>(patch),
            )
            .await?;
        debug!(name, ops = ops.len(), "patched StoragePoolClaim annotations");
        Ok(())
    }
}

/// CStorPool access backed by the apiserver. Pools are cluster-scoped and
/// carry their owning claim in the `openebs.io/storage-pool-claim` label.
#[derive(Clone)]
pub struct KubeCspStore {
    client: Client,
}

impl KubeCspStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<CStorPool> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl CspStore for KubeCspStore {
    #[instrument(skip(self))]
    async fn list_for_claim(&self, spc_name: &str) -> Result<Vec<CStorPool>> {
        let params =
            ListParams::default().labels(&format!("{STORAGE_POOL_CLAIM_LABEL}={spc_name}"));
        Ok(self.api().list(&params).await?.items)
    }

    async fn list_all(&self) -> Result<Vec<CStorPool>> {
        Ok(self.api().list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self, csp))]
    async fn update(&self, csp: &CStorPool) -> Result<CStorPool> {
        let name = csp
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Internal("pool has no name".to_string()))?;
        Ok(self.api().replace(name, &PostParams::default(), csp).await?)
    }
}

/// Read-only disk inventory backed by the apiserver.
#[derive(Clone)]
pub struct KubeDiskInventory {
    client: Client,
}

impl KubeDiskInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<Disk> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl DiskInventory for KubeDiskInventory {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Option<Disk>> {
        Ok(self.api().get_opt(name).await?)
    }

    async fn list(&self) -> Result<Vec<Disk>> {
        Ok(self.api().list(&ListParams::default()).await?.items)
    }
}

/// Pod phase lookup for the lease liveness check.
#[derive(Clone)]
pub struct KubePodReader {
    client: Client,
}

impl KubePodReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodReader for KubePodReader {
    #[instrument(skip(self))]
    async fn observe(&self, namespace: &str, name: &str) -> Result<PodObservation> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            None => Ok(PodObservation::NotFound),
            Some(pod) => {
                let phase = pod
                    .status
                    .and_then(|s| s.phase)
                    .unwrap_or_else(|| "Unknown".to_string());
                Ok(PodObservation::Phase(phase))
            }
        }
    }
}
