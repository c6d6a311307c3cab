// Allow dead code for library-style API methods not yet used by the binary
#![allow(dead_code)]

//! StoragePoolClaim Custom Resource Definition
//!
//! A StoragePoolClaim (SPC) declares the desired cStor pool topology for a
//! cluster: which disk family to draw from, the RAID layout, and either a
//! pool cap (auto mode) or an explicit disk list (manual mode).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation on the SPC holding the reconcile lease value.
pub const CSP_LEASE_ANNOTATION: &str = "openebs.io/csp-lease";

/// Annotation on the SPC holding the MD5 of `spec.disks`.
pub const CSP_DISK_HASH_ANNOTATION: &str = "openebs.io/csp-disk-hash";

/// Annotation that suspends reconciliation of an SPC when set to "true".
pub const RECONCILE_DISABLE_ANNOTATION: &str = "reconcile.openebs.io/disable";

/// JSON-Patch path of the lease annotation (RFC 6901, `/` escaped as `~1`).
pub const CSP_LEASE_PATCH_PATH: &str = "/metadata/annotations/openebs.io~1csp-lease";

/// JSON-Patch path of the disk-hash annotation.
pub const CSP_DISK_HASH_PATCH_PATH: &str = "/metadata/annotations/openebs.io~1csp-disk-hash";

/// Label linking a CStorPool (and pool deployments) back to its SPC.
pub const STORAGE_POOL_CLAIM_LABEL: &str = "openebs.io/storage-pool-claim";

/// Name of the sparse-pool claim installed when the preset gate is on.
pub const SPARSE_POOL_CLAIM_NAME: &str = "cstor-sparse-pool";

// =============================================================================
// StoragePoolClaim CRD
// =============================================================================

/// StoragePoolClaim declares a set of cStor pools to be provisioned across
/// the cluster.
///
/// Two provisioning modes exist:
/// - **auto**: `spec.disks.diskList` is absent; the operator picks disks from
///   the inventory, capped at `spec.maxPools` pools.
/// - **manual**: `spec.disks.diskList` names the exact disks; the operator
///   only arranges them into RAID groups per host.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "StoragePoolClaim",
    plural = "storagepoolclaims",
    shortname = "spc",
    status = "StoragePoolClaimStatus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "PoolType", "type": "string", "jsonPath": ".spec.poolSpec.poolType"}"#,
    printcolumn = r#"{"name": "MaxPools", "type": "integer", "jsonPath": ".spec.maxPools"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolClaimSpec {
    /// Disk family the pools are built from: physical disks or sparse files.
    /// Matched against the `ndm.io/disk-type` label on Disk resources.
    #[serde(default)]
    pub r#type: String,

    /// Upper bound on the number of pools in auto mode. Required (and must
    /// be non-negative) when no disk list is given; ignored in manual mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pools: Option<i32>,

    /// RAID layout applied to every pool provisioned from this claim.
    #[serde(default)]
    pub pool_spec: PoolAttr,

    /// Disk selection. An absent `diskList` selects auto mode; a present
    /// list (even an empty one) selects manual mode.
    #[serde(default)]
    pub disks: SpcDisks,
}

/// RAID layout attributes shared by SPC and CSP specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolAttr {
    /// One of `striped`, `mirrored`, `raidz`, `raidz2`.
    #[serde(default)]
    pub pool_type: String,

    /// Optional zpool cache file for faster imports.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_file: String,

    /// Allow thin provisioning on the pool.
    #[serde(default)]
    pub over_provisioning: bool,
}

/// Disk selection block of an SPC. The distinction between `None` and
/// `Some(vec![])` is load-bearing: `None` means auto mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpcDisks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolClaimStatus {
    #[serde(default)]
    pub phase: SpcPhase,
}

/// Lifecycle tag mutated by the reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SpcPhase {
    #[default]
    Pending,
    Online,
}

/// RAID group layout of a pool. The group size fixes how many disks each
/// top-level vdev consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolType {
    Striped,
    Mirrored,
    Raidz,
    Raidz2,
}

impl PoolType {
    pub fn parse(s: &str) -> Option<PoolType> {
        match s {
            "striped" => Some(PoolType::Striped),
            "mirrored" => Some(PoolType::Mirrored),
            "raidz" => Some(PoolType::Raidz),
            "raidz2" => Some(PoolType::Raidz2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Striped => "striped",
            PoolType::Mirrored => "mirrored",
            PoolType::Raidz => "raidz",
            PoolType::Raidz2 => "raidz2",
        }
    }

    /// Number of disks one RAID group of this layout consumes.
    pub fn default_disk_count(&self) -> usize {
        match self {
            PoolType::Striped => 1,
            PoolType::Mirrored => 2,
            PoolType::Raidz => 3,
            PoolType::Raidz2 => 6,
        }
    }
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StoragePoolClaim {
    /// Manual provisioning is selected by the mere presence of a disk list,
    /// even an empty one.
    pub fn is_manual(&self) -> bool {
        self.spec.disks.disk_list.is_some()
    }

    pub fn is_auto(&self) -> bool {
        !self.is_manual()
    }

    pub fn disk_list(&self) -> &[String] {
        self.spec
            .disks
            .disk_list
            .as_deref()
            .unwrap_or(&[])
    }

    pub fn pool_type(&self) -> Option<PoolType> {
        PoolType::parse(&self.spec.pool_spec.pool_type)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn reconcile_disabled(&self) -> bool {
        self.annotation(RECONCILE_DISABLE_ANNOTATION) == Some("true")
    }

    /// The claim installed by the sparse-pool preset at startup.
    pub fn default_sparse_claim() -> StoragePoolClaim {
        StoragePoolClaim::new(
            SPARSE_POOL_CLAIM_NAME,
            StoragePoolClaimSpec {
                r#type: "sparse".to_string(),
                max_pools: Some(3),
                pool_spec: PoolAttr {
                    pool_type: PoolType::Striped.as_str().to_string(),
                    ..PoolAttr::default()
                },
                disks: SpcDisks::default(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn claim(disks: Option<Vec<&str>>) -> StoragePoolClaim {
        StoragePoolClaim::new(
            "pool1",
            StoragePoolClaimSpec {
                r#type: "disk".to_string(),
                max_pools: Some(3),
                pool_spec: PoolAttr {
                    pool_type: "striped".to_string(),
                    ..PoolAttr::default()
                },
                disks: SpcDisks {
                    disk_list: disks.map(|d| d.into_iter().map(String::from).collect()),
                },
            },
        )
    }

    #[test]
    fn absent_disk_list_is_auto_mode() {
        let spc = claim(None);
        assert!(spc.is_auto());
        assert!(!spc.is_manual());
    }

    #[test]
    fn empty_disk_list_is_manual_mode() {
        let spc = claim(Some(vec![]));
        assert!(spc.is_manual());
    }

    #[test]
    fn populated_disk_list_is_manual_mode() {
        let spc = claim(Some(vec!["disk-1"]));
        assert!(spc.is_manual());
        assert_eq!(spc.disk_list(), ["disk-1".to_string()]);
    }

    #[test]
    fn group_sizes_per_pool_type() {
        assert_eq!(PoolType::Striped.default_disk_count(), 1);
        assert_eq!(PoolType::Mirrored.default_disk_count(), 2);
        assert_eq!(PoolType::Raidz.default_disk_count(), 3);
        assert_eq!(PoolType::Raidz2.default_disk_count(), 6);
    }

    #[test]
    fn pool_type_round_trips_through_parse() {
        for name in ["striped", "mirrored", "raidz", "raidz2"] {
            assert_eq!(PoolType::parse(name).unwrap().as_str(), name);
        }
        assert!(PoolType::parse("raid5").is_none());
        assert!(PoolType::parse("").is_none());
    }

    #[test]
    fn reconcile_disable_annotation_gates() {
        let mut spc = claim(None);
        assert!(!spc.reconcile_disabled());
        let mut ann = BTreeMap::new();
        ann.insert(RECONCILE_DISABLE_ANNOTATION.to_string(), "true".to_string());
        spc.metadata.annotations = Some(ann);
        assert!(spc.reconcile_disabled());
    }

    #[test]
    fn sparse_preset_shape() {
        let spc = StoragePoolClaim::default_sparse_claim();
        assert_eq!(spc.metadata.name.as_deref(), Some(SPARSE_POOL_CLAIM_NAME));
        assert_eq!(spc.spec.r#type, "sparse");
        assert_eq!(spc.spec.max_pools, Some(3));
        assert_eq!(spc.pool_type(), Some(PoolType::Striped));
        assert!(spc.is_auto());
    }
}
