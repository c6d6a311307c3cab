//! Custom Resource Definitions
//!
//! This module contains all CRD definitions used by the operator.

mod cstor_pool;
mod disk;
mod storage_pool_claim;

// Re-export all types for public API
#[allow(unused_imports)]
pub use storage_pool_claim::{
    PoolAttr, PoolType, SpcDisks, SpcPhase, StoragePoolClaim, StoragePoolClaimSpec,
    StoragePoolClaimStatus, CSP_DISK_HASH_ANNOTATION, CSP_DISK_HASH_PATCH_PATH,
    CSP_LEASE_ANNOTATION, CSP_LEASE_PATCH_PATH, RECONCILE_DISABLE_ANNOTATION,
    SPARSE_POOL_CLAIM_NAME, STORAGE_POOL_CLAIM_LABEL,
};

#[allow(unused_imports)]
pub use cstor_pool::{
    CStorPool, CStorPoolSpec, CStorPoolStatus, CspDisk, CstorOperation, DiskGroup,
    OperationAction, OperationStatus,
};

#[allow(unused_imports)]
pub use disk::{
    Disk, DiskDevLink, DiskSpec, DiskStatus, DISK_STATE_ACTIVE, DISK_TYPE_LABEL, HOSTNAME_LABEL,
};
