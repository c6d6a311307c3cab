// Allow dead code for library-style API methods not yet used by the binary
#![allow(dead_code)]

//! CStorPool Custom Resource Definition
//!
//! One CStorPool (CSP) backs one provisioned pool on one node. The operator
//! creates and mutates CSPs; the node-local pool agent consumes them and is
//! authoritative for the actual zpool lifecycle.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::storage_pool_claim::{PoolAttr, PoolType};

// =============================================================================
// CStorPool CRD
// =============================================================================

/// CStorPool records the disk layout of one pool on one node.
///
/// Labels carry the ownership and placement facts: `openebs.io/storage-pool-claim`
/// names the claim, `kubernetes.io/hostname` the node.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CStorPool",
    plural = "cstorpools",
    shortname = "csp",
    status = "CStorPoolStatus",
    printcolumn = r#"{"name": "PoolType", "type": "string", "jsonPath": ".spec.poolSpec.poolType"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolSpec {
    /// Top-level vdevs of the pool, in creation order. Every group holds
    /// exactly `default_disk_count(poolType)` disk slots.
    #[serde(default)]
    pub group: Vec<DiskGroup>,

    /// RAID layout, copied from the owning claim.
    #[serde(default)]
    pub pool_spec: PoolAttr,

    /// Work orders for the node-local pool agent, appended by the operator
    /// and drained by the agent. Kept in the spec so a group mutation and
    /// its work order land in the same write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<CstorOperation>,
}

/// One top-level vdev worth of disk slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskGroup {
    #[serde(default)]
    pub item: Vec<CspDisk>,
}

/// A disk slot inside a group. `in_use_by_pool == false` means the slot is
/// logically detached but keeps its identity for later replace/re-attach.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CspDisk {
    pub name: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub in_use_by_pool: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolStatus {
    #[serde(default)]
    pub phase: String,
}

/// One work order handed to the pool agent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CstorOperation {
    pub action: OperationAction,
    pub status: OperationStatus,

    /// Device ids being added (PoolExpand, DiskReplace).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_disks: Vec<String>,

    /// Device id being retired (DiskReplace, DiskRemove).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub old_disk: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OperationAction {
    PoolExpand,
    PoolDelete,
    DiskReplace,
    DiskRemove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OperationStatus {
    Init,
    InProgress,
    Done,
    Failed,
}

impl CstorOperation {
    pub fn pool_delete() -> CstorOperation {
        CstorOperation {
            action: OperationAction::PoolDelete,
            status: OperationStatus::Init,
            new_disks: Vec::new(),
            old_disk: String::new(),
        }
    }

    pub fn pool_expand(new_disks: Vec<String>) -> CstorOperation {
        CstorOperation {
            action: OperationAction::PoolExpand,
            status: OperationStatus::Init,
            new_disks,
            old_disk: String::new(),
        }
    }

    pub fn disk_replace(old_disk: String, new_disk: String) -> CstorOperation {
        CstorOperation {
            action: OperationAction::DiskReplace,
            status: OperationStatus::Init,
            new_disks: vec![new_disk],
            old_disk,
        }
    }

    pub fn disk_remove(old_disk: String) -> CstorOperation {
        CstorOperation {
            action: OperationAction::DiskRemove,
            status: OperationStatus::Init,
            new_disks: Vec::new(),
            old_disk,
        }
    }
}

impl CStorPool {
    pub fn pool_type(&self) -> Option<PoolType> {
        PoolType::parse(&self.spec.pool_spec.pool_type)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// Disk names currently carried by the pool, detached slots included.
    pub fn disk_names(&self) -> impl Iterator<Item = &str> {
        self.spec
            .group
            .iter()
            .flat_map(|g| g.item.iter())
            .map(|d| d.name.as_str())
    }

    /// A top-level vdev is lost when any single group has accumulated as
    /// many detached slots as the group size. A pool with a lost vdev
    /// cannot be repaired and must be deleted.
    pub fn is_top_vdev_lost(&self) -> bool {
        let Some(pool_type) = self.pool_type() else {
            return false;
        };
        let group_size = pool_type.default_disk_count();
        self.spec
            .group
            .iter()
            .any(|g| g.item.iter().filter(|d| !d.in_use_by_pool).count() >= group_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csp(pool_type: &str, groups: Vec<Vec<(&str, bool)>>) -> CStorPool {
        CStorPool::new(
            "pool1-abcd",
            CStorPoolSpec {
                group: groups
                    .into_iter()
                    .map(|items| DiskGroup {
                        item: items
                            .into_iter()
                            .map(|(name, in_use)| CspDisk {
                                name: name.to_string(),
                                device_id: format!("/dev/disk/by-id/{name}"),
                                in_use_by_pool: in_use,
                            })
                            .collect(),
                    })
                    .collect(),
                pool_spec: PoolAttr {
                    pool_type: pool_type.to_string(),
                    ..PoolAttr::default()
                },
                operations: Vec::new(),
            },
        )
    }

    #[test]
    fn striped_pool_loses_vdev_on_single_detached_slot() {
        let csp = csp("striped", vec![vec![("disk-1", true)], vec![("disk-2", false)]]);
        assert!(csp.is_top_vdev_lost());
    }

    #[test]
    fn mirrored_pool_with_all_slots_attached_is_healthy() {
        let csp = csp("mirrored", vec![vec![("disk-1", true), ("disk-2", true)]]);
        assert!(!csp.is_top_vdev_lost());
    }

    #[test]
    fn mirrored_pool_survives_one_detached_slot() {
        let csp = csp("mirrored", vec![vec![("disk-1", true), ("disk-2", false)]]);
        assert!(!csp.is_top_vdev_lost());
    }

    #[test]
    fn mirrored_pool_loses_vdev_when_whole_group_detaches() {
        let csp = csp(
            "mirrored",
            vec![
                vec![("disk-1", true), ("disk-2", true)],
                vec![("disk-3", false), ("disk-4", false)],
            ],
        );
        assert!(csp.is_top_vdev_lost());
    }

    #[test]
    fn unknown_pool_type_never_reports_vdev_loss() {
        let csp = csp("raid5", vec![vec![("disk-1", false)]]);
        assert!(!csp.is_top_vdev_lost());
    }

    #[test]
    fn operation_constructors_carry_device_ids() {
        let op = CstorOperation::disk_replace("dev-old".into(), "dev-new".into());
        assert_eq!(op.action, OperationAction::DiskReplace);
        assert_eq!(op.status, OperationStatus::Init);
        assert_eq!(op.old_disk, "dev-old");
        assert_eq!(op.new_disks, vec!["dev-new".to_string()]);
    }
}
