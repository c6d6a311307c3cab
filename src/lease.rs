//! StoragePoolClaim lease arbiter
//!
//! Serializes reconciliation of one claim across operator replicas. The
//! lease lives in an SPC annotation as a JSON value naming the holder pod
//! and a transition counter. A contender may take the lease over only after
//! proving the holder pod is gone; any ambiguity counts as alive.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crd::{StoragePoolClaim, CSP_LEASE_ANNOTATION, CSP_LEASE_PATCH_PATH};
use crate::domain::ports::{JsonPatchOp, PodObservation, PodReader, SpcStore};
use crate::error::{Error, Result};

/// Lease annotation payload. An empty holder means the lease is free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseValue {
    pub holder: String,
    pub leader_transition: i64,
}

/// Self-identity of this operator replica, `<namespace>/<pod-name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub namespace: String,
    pub pod_name: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, pod_name: impl Into<String>) -> Identity {
        Identity {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
        }
    }

    pub fn from_env() -> Result<Identity> {
        let namespace = std::env::var("NAMESPACE").map_err(|_| Error::MissingEnv("NAMESPACE"))?;
        let pod_name = std::env::var("POD_NAME").map_err(|_| Error::MissingEnv("POD_NAME"))?;
        Ok(Identity::new(namespace, pod_name))
    }

    pub fn qualified(&self) -> String {
        format!("{}/{}", self.namespace, self.pod_name)
    }
}

pub struct SpcLease<'a, S: SpcStore + ?Sized, P: PodReader + ?Sized> {
    spc_store: &'a S,
    pods: &'a P,
    identity: Identity,
}

impl<'a, S: SpcStore + ?Sized, P: PodReader + ?Sized> SpcLease<'a, S, P> {
    pub fn new(spc_store: &'a S, pods: &'a P, identity: Identity) -> Self {
        Self {
            spc_store,
            pods,
            identity,
        }
    }

    /// Try to claim the lease on the given claim. Succeeds when the lease is
    /// free, the holder is provably dead, or we already hold it. Returns the
    /// claim carrying the written lease.
    pub async fn hold(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim> {
        let myself = self.identity.qualified();
        let raw = spc
            .annotation(CSP_LEASE_ANNOTATION)
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let current = match raw {
            Some(v) => Some(serde_json::from_str::<LeaseValue>(v)?),
            None => None,
        };

        if let Some(lease) = &current {
            if lease.holder == myself {
                return Ok(spc.clone());
            }
            if !lease.holder.trim().is_empty() && self.is_holder_alive(&lease.holder).await {
                return Err(Error::LeaseHeld(lease.holder.clone()));
            }
        }

        // Transition starts at 1 on the first-ever claim and increments on
        // every takeover of a previously-written lease, released or not,
        // keeping it strictly monotonic.
        let next = LeaseValue {
            holder: myself,
            leader_transition: current.map(|l| l.leader_transition + 1).unwrap_or(1),
        };
        let value = serde_json::to_string(&next)?;

        let mut updated = spc.clone();
        updated
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(CSP_LEASE_ANNOTATION.to_string(), value);
        let written = self.spc_store.update(&updated).await?;
        info!(
            spc = %spc.metadata.name.as_deref().unwrap_or_default(),
            transition = next.leader_transition,
            "acquired reconcile lease"
        );
        Ok(written)
    }

    /// Release the lease by blanking the holder through a patch of the
    /// single annotation path, keeping the transition counter intact.
    pub async fn release(&self, spc: &StoragePoolClaim) -> Result<()> {
        let name = spc.metadata.name.as_deref().unwrap_or_default();
        let Some(raw) = spc.annotation(CSP_LEASE_ANNOTATION) else {
            return Ok(());
        };
        let mut lease: LeaseValue = serde_json::from_str(raw)?;
        if lease.holder != self.identity.qualified() {
            warn!(spc = %name, holder = %lease.holder, "skipping release of a lease we do not hold");
            return Ok(());
        }
        lease.holder = String::new();
        let value = serde_json::to_string(&lease)?;
        self.spc_store
            .patch(name, &[JsonPatchOp::replace(CSP_LEASE_PATCH_PATH, value)])
            .await?;
        info!(spc = %name, "released reconcile lease");
        Ok(())
    }

    /// Liveness of the holder pod. Only a NotFound observation proves death;
    /// lookup failures and the Unknown phase count as alive so that an
    /// apiserver hiccup can never cause a double-drive.
    async fn is_holder_alive(&self, holder: &str) -> bool {
        let Some((namespace, pod)) = holder.split_once('/') else {
            return false;
        };
        match self.pods.observe(namespace, pod).await {
            Ok(PodObservation::NotFound) => false,
            Ok(PodObservation::Phase(phase)) => phase == "Running" || phase == "Unknown",
            Err(e) => {
                warn!(holder, error = %e, "holder liveness check failed, assuming alive");
                true
            }
        }
    }
}
