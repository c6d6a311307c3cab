// Domain ports are defined for adapter implementations and test fakes
#![allow(dead_code)]

//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the abstractions (ports) the reconciler depends on.
//! Infrastructure adapters implement these traits against the Kubernetes
//! API; tests substitute in-memory implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  SpcStore │ CspStore │ DiskInventory │ PodReader    │    │
//! │  │            │ CasPoolSink │ EventRecorder │           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  KubeSpcStore │ KubeCspStore │ KubeDiskInventory    │    │
//! │  │        KubePodReader │ LoggingCasPoolSink           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::crd::{CStorPool, Disk, StoragePoolClaim};
use crate::error::Result;
use crate::pool::CasPool;

// =============================================================================
// Value Objects
// =============================================================================

/// A single RFC 6902 operation targeting one annotation path. Annotation
/// writes go through JSON-Patch to keep the conflict surface to one path
/// instead of the whole object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPatchOp {
    pub op: PatchVerb,
    /// RFC 6901 pointer, `/` inside key names escaped as `~1`.
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchVerb {
    Add,
    Replace,
}

impl PatchVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchVerb::Add => "add",
            PatchVerb::Replace => "replace",
        }
    }
}

impl JsonPatchOp {
    pub fn add(path: impl Into<String>, value: impl Into<String>) -> JsonPatchOp {
        JsonPatchOp {
            op: PatchVerb::Add,
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<String>) -> JsonPatchOp {
        JsonPatchOp {
            op: PatchVerb::Replace,
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Phase of a pod looked up for lease liveness. `NotFound` is the only
/// observation that proves the holder is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodObservation {
    NotFound,
    Phase(String),
}

// =============================================================================
// StoragePoolClaim Port
// =============================================================================

/// Read and write access to StoragePoolClaim objects.
#[async_trait]
pub trait SpcStore: Send + Sync {
    /// Get a claim by name. `Ok(None)` when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<StoragePoolClaim>>;

    /// Create a new claim. Used only by the sparse-pool preset.
    async fn create(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim>;

    /// Replace the whole object, subject to resource-version CAS.
    async fn update(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim>;

    /// Write the status subresource.
    async fn update_status(&self, spc: &StoragePoolClaim) -> Result<StoragePoolClaim>;

    /// Apply a JSON-Patch touching only the named annotation paths.
    async fn patch(&self, name: &str, ops: &[JsonPatchOp]) -> Result<()>;
}

// =============================================================================
// CStorPool Port
// =============================================================================

/// Read and write access to CStorPool objects.
#[async_trait]
pub trait CspStore: Send + Sync {
    /// List the pools labelled with the given claim name.
    async fn list_for_claim(&self, spc_name: &str) -> Result<Vec<CStorPool>>;

    /// List every pool in the cluster.
    async fn list_all(&self) -> Result<Vec<CStorPool>>;

    /// Replace the whole object, subject to resource-version CAS. Pool
    /// destruction is not exposed here: the pool agent owns it, driven by
    /// the PoolDelete work order.
    async fn update(&self, csp: &CStorPool) -> Result<CStorPool>;
}

// =============================================================================
// Disk Inventory Port
// =============================================================================

/// Read-only view of the disk inventory published by the node disk manager.
#[async_trait]
pub trait DiskInventory: Send + Sync {
    /// Get a disk by name. `Ok(None)` when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<Disk>>;

    /// List every disk in the cluster.
    async fn list(&self) -> Result<Vec<Disk>>;
}

// =============================================================================
// Pod Lookup Port
// =============================================================================

/// Pod phase lookup used exclusively by the lease liveness check.
///
/// The distinction between the three outcomes matters: `NotFound` proves the
/// holder is dead, a phase reports on it, and a transport error must be
/// treated as "alive" by the caller (never evict on ambiguity).
#[async_trait]
pub trait PodReader: Send + Sync {
    async fn observe(&self, namespace: &str, name: &str) -> Result<PodObservation>;
}

// =============================================================================
// CasPool Sink Port
// =============================================================================

/// Receiver of shaped pool-provisioning requests. The external template
/// engine behind this port turns a [`CasPool`] into the pool deployment and
/// its CStorPool object.
#[async_trait]
pub trait CasPoolSink: Send + Sync {
    async fn dispatch(&self, pool: &CasPool) -> Result<()>;
}

// =============================================================================
// Event Recorder Port
// =============================================================================

/// Recorder of Kubernetes warning events attached to a claim, surfacing in
/// `kubectl describe spc`. Best effort: implementations swallow and log
/// delivery failures, so a broken events API can never fail a sync.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn warn(&self, spc: &StoragePoolClaim, reason: &str, message: &str);
}
