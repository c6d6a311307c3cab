//! cStor SPC Operator
//!
//! A Kubernetes operator that provisions and maintains clustered cStor
//! block-storage pools from StoragePoolClaim declarations.
//!
//! # Architecture
//!
//! The operator is one informer-driven control loop:
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   Informer   │───▶│  Work Queue  │───▶│     Sync     │
//! │   (intake)   │    │  (keyed,     │    │   Handler    │
//! │              │    │   retrying)  │    │              │
//! └──────────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! Each sync validates the claim, arbitrates a lease against other operator
//! replicas, provisions however many pools the claim still owes, and runs
//! the disk-ops pipeline when the declared disk list changed.
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`controller`] - Informer intake, work queue, sync handler
//! - [`crd`] - Custom Resource Definitions for Kubernetes
//! - [`domain`] - Domain layer with ports (DDD)
//! - [`error`] - Error types
//! - [`hash`] - Disk-list fingerprinting
//! - [`lease`] - Per-claim reconcile lease
//! - [`pool`] - Pool math, disk selection, disk-ops pipeline, CasPool emitter

pub mod adapters;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod hash;
pub mod lease;
pub mod pool;

// Re-export commonly used types
pub use crd::{CStorPool, Disk, StoragePoolClaim};
pub use error::{Error, Result};
