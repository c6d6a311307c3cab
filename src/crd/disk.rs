// Allow dead code for library-style API methods not yet used by the binary
#![allow(dead_code)]

//! Disk Custom Resource Definition
//!
//! Disks are published by the node disk manager running on every node; the
//! operator only reads them. Labels carry the placement facts the selector
//! filters on.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label naming the node a disk is attached to.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Label carrying the disk family, `disk` or `sparse`.
pub const DISK_TYPE_LABEL: &str = "ndm.io/disk-type";

/// State of a disk the selector will consider.
pub const DISK_STATE_ACTIVE: &str = "Active";

// =============================================================================
// Disk CRD
// =============================================================================

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "Disk",
    plural = "disks",
    status = "DiskStatus",
    printcolumn = r#"{"name": "Path", "type": "string", "jsonPath": ".spec.path"}"#,
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    /// Kernel device path, e.g. `/dev/sdb`. Not stable across reboots.
    #[serde(default)]
    pub path: String,

    /// Stable device links discovered by the node disk manager, preferred
    /// over `path` as the device identity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dev_links: Vec<DiskDevLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskDevLink {
    /// Link family, e.g. `by-id` or `by-path`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskStatus {
    /// `Active` or `Inactive`.
    #[serde(default)]
    pub state: String,
}

impl Disk {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.label(HOSTNAME_LABEL)
    }

    pub fn disk_type(&self) -> Option<&str> {
        self.label(DISK_TYPE_LABEL)
    }

    pub fn is_active(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.state == DISK_STATE_ACTIVE)
            .unwrap_or(false)
    }

    /// Stable identity of the device: the first link of the first devlink
    /// entry, falling back to the kernel path when no links exist.
    pub fn device_id(&self) -> &str {
        self.spec
            .dev_links
            .first()
            .and_then(|dl| dl.links.first())
            .map(String::as_str)
            .filter(|link| !link.is_empty())
            .unwrap_or(&self.spec.path)
    }
}
