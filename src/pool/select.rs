//! Node and disk selection
//!
//! Turns a claim plus the live disk inventory into concrete per-node
//! allocations. Auto mode draws from the inventory; manual mode only
//! arranges the disks the claim lists. Yielding fewer allocations than
//! requested is a normal outcome, not an error.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::crd::{CStorPool, Disk, PoolType, StoragePoolClaim, HOSTNAME_LABEL};
use crate::error::Result;
use crate::pool::math::require_pool_type;

/// A disk picked for a pool, with its stable device identity resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDisk {
    pub name: String,
    pub device_id: String,
}

/// One pool worth of disks on one node. Every inner group holds exactly
/// `default_disk_count(pool_type)` disks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub host: String,
    pub disk_groups: Vec<Vec<SelectedDisk>>,
}

/// Select up to `pending` allocations for the claim.
///
/// `all_csps` is the cluster-wide pool list; pools labelled with this claim
/// rule out their hosts, and disks held by any pool are never re-issued.
pub fn select(
    spc: &StoragePoolClaim,
    inventory: &[Disk],
    all_csps: &[CStorPool],
    pending: usize,
) -> Result<Vec<Allocation>> {
    let pool_type = require_pool_type(spc)?;
    let spc_name = spc.metadata.name.as_deref().unwrap_or_default();

    let used_disks: HashSet<&str> = all_csps.iter().flat_map(|c| c.disk_names()).collect();
    let used_hosts: HashSet<&str> = all_csps
        .iter()
        .filter(|c| c.label(crate::crd::STORAGE_POOL_CLAIM_LABEL) == Some(spc_name))
        .filter_map(|c| c.label(HOSTNAME_LABEL))
        .collect();

    let allocations = if spc.is_manual() {
        select_manual(spc, inventory, pool_type, &used_disks, &used_hosts)
    } else {
        select_auto(spc, inventory, pool_type, &used_disks, &used_hosts)
    };

    if allocations.len() < pending {
        debug!(
            spc = spc_name,
            pending,
            eligible = allocations.len(),
            "partial node allotment, remainder retried on next resync"
        );
    }

    Ok(allocations.into_iter().take(pending).collect())
}

/// Auto mode: every Active disk of the claim's family on a host without a
/// pool for this claim is a candidate; full groups only.
fn select_auto(
    spc: &StoragePoolClaim,
    inventory: &[Disk],
    pool_type: PoolType,
    used_disks: &HashSet<&str>,
    used_hosts: &HashSet<&str>,
) -> Vec<Allocation> {
    // BTreeMap keys give the deterministic host order the selection relies on.
    let mut host_disks: BTreeMap<&str, Vec<&Disk>> = BTreeMap::new();

    for disk in inventory {
        if !disk.is_active() || disk.disk_type() != Some(spc.spec.r#type.as_str()) {
            continue;
        }
        let Some(name) = disk.metadata.name.as_deref() else {
            continue;
        };
        if used_disks.contains(name) {
            continue;
        }
        let Some(host) = disk.hostname() else {
            continue;
        };
        if used_hosts.contains(host) {
            continue;
        }
        host_disks.entry(host).or_default().push(disk);
    }

    host_disks
        .into_iter()
        .filter_map(|(host, disks)| group_disks(host, &disks, pool_type))
        .collect()
}

/// Manual mode: only the listed disks count, and a host qualifies iff its
/// share of them chunks into whole groups with nothing left over.
fn select_manual(
    spc: &StoragePoolClaim,
    inventory: &[Disk],
    pool_type: PoolType,
    used_disks: &HashSet<&str>,
    used_hosts: &HashSet<&str>,
) -> Vec<Allocation> {
    let by_name: BTreeMap<&str, &Disk> = inventory
        .iter()
        .filter_map(|d| d.metadata.name.as_deref().map(|n| (n, d)))
        .collect();

    let mut host_disks: BTreeMap<&str, Vec<&Disk>> = BTreeMap::new();
    for name in spc.disk_list() {
        let Some(disk) = by_name.get(name.as_str()) else {
            warn!(disk = %name, "listed disk not found in inventory");
            continue;
        };
        if used_disks.contains(name.as_str()) {
            continue;
        }
        let Some(host) = disk.hostname() else {
            warn!(disk = %name, "listed disk carries no hostname label");
            continue;
        };
        if used_hosts.contains(host) {
            continue;
        }
        host_disks.entry(host).or_default().push(disk);
    }

    let group_size = pool_type.default_disk_count();
    host_disks
        .into_iter()
        .filter(|(_, disks)| !disks.is_empty() && disks.len() % group_size == 0)
        .filter_map(|(host, disks)| group_disks(host, &disks, pool_type))
        .collect()
}

/// Chunk a host's disks into consecutive full groups; a trailing partial
/// group is dropped. Returns `None` when not even one group forms.
fn group_disks(host: &str, disks: &[&Disk], pool_type: PoolType) -> Option<Allocation> {
    let group_size = pool_type.default_disk_count();
    let disk_groups: Vec<Vec<SelectedDisk>> = disks
        .chunks_exact(group_size)
        .map(|chunk| {
            chunk
                .iter()
                .map(|d| SelectedDisk {
                    name: d.metadata.name.clone().unwrap_or_default(),
                    device_id: d.device_id().to_string(),
                })
                .collect()
        })
        .collect();

    if disk_groups.is_empty() {
        return None;
    }
    Some(Allocation {
        host: host.to_string(),
        disk_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        CStorPoolSpec, CspDisk, DiskDevLink, DiskGroup, DiskSpec, DiskStatus, PoolAttr, SpcDisks,
        StoragePoolClaimSpec, DISK_TYPE_LABEL, STORAGE_POOL_CLAIM_LABEL,
    };
    use std::collections::BTreeMap;

    fn claim(
        storage_type: &str,
        pool_type: &str,
        max_pools: Option<i32>,
        disks: Option<Vec<&str>>,
    ) -> StoragePoolClaim {
        StoragePoolClaim::new(
            "pool1",
            StoragePoolClaimSpec {
                r#type: storage_type.to_string(),
                max_pools,
                pool_spec: PoolAttr {
                    pool_type: pool_type.to_string(),
                    ..PoolAttr::default()
                },
                disks: SpcDisks {
                    disk_list: disks.map(|d| d.into_iter().map(String::from).collect()),
                },
            },
        )
    }

    fn disk(name: &str, host: &str, disk_type: &str, state: &str) -> Disk {
        let mut d = Disk::new(
            name,
            DiskSpec {
                path: format!("/dev/{name}"),
                dev_links: vec![DiskDevLink {
                    kind: "by-id".to_string(),
                    links: vec![format!("/dev/disk/by-id/{name}")],
                }],
            },
        );
        let mut labels = BTreeMap::new();
        labels.insert(HOSTNAME_LABEL.to_string(), host.to_string());
        labels.insert(DISK_TYPE_LABEL.to_string(), disk_type.to_string());
        d.metadata.labels = Some(labels);
        d.status = Some(DiskStatus { state: state.to_string() });
        d
    }

    fn csp(name: &str, spc: &str, host: &str, disks: Vec<&str>) -> CStorPool {
        let mut c = CStorPool::new(
            name,
            CStorPoolSpec {
                group: vec![DiskGroup {
                    item: disks
                        .into_iter()
                        .map(|d| CspDisk {
                            name: d.to_string(),
                            device_id: String::new(),
                            in_use_by_pool: true,
                        })
                        .collect(),
                }],
                pool_spec: PoolAttr::default(),
                operations: Vec::new(),
            },
        );
        let mut labels = BTreeMap::new();
        labels.insert(STORAGE_POOL_CLAIM_LABEL.to_string(), spc.to_string());
        labels.insert(HOSTNAME_LABEL.to_string(), host.to_string());
        c.metadata.labels = Some(labels);
        c
    }

    #[test]
    fn auto_picks_hosts_in_name_order_up_to_pending() {
        let spc = claim("disk", "striped", Some(2), None);
        let inventory = vec![
            disk("disk-c", "node-3", "disk", "Active"),
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-2", "disk", "Active"),
        ];
        let got = select(&spc, &inventory, &[], 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].host, "node-1");
        assert_eq!(got[1].host, "node-2");
    }

    #[test]
    fn auto_filters_inactive_and_foreign_type_disks() {
        let spc = claim("sparse", "striped", Some(3), None);
        let inventory = vec![
            disk("disk-a", "node-1", "sparse", "Inactive"),
            disk("disk-b", "node-2", "disk", "Active"),
            disk("disk-c", "node-3", "sparse", "Active"),
        ];
        let got = select(&spc, &inventory, &[], 3).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].host, "node-3");
    }

    #[test]
    fn auto_skips_hosts_already_holding_a_pool_for_this_claim() {
        let spc = claim("disk", "striped", Some(2), None);
        let inventory = vec![
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-2", "disk", "Active"),
        ];
        let csps = vec![csp("pool1-x", "pool1", "node-1", vec!["disk-z"])];
        let got = select(&spc, &inventory, &csps, 2).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].host, "node-2");
    }

    #[test]
    fn auto_never_reissues_disks_held_by_any_pool() {
        let spc = claim("disk", "mirrored", Some(1), None);
        let inventory = vec![
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-1", "disk", "Active"),
        ];
        // disk-a already belongs to a pool of another claim
        let csps = vec![csp("other-x", "other", "node-9", vec!["disk-a"])];
        let got = select(&spc, &inventory, &csps, 1).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn auto_emits_only_full_groups() {
        let spc = claim("disk", "mirrored", Some(1), None);
        let inventory = vec![
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-1", "disk", "Active"),
            disk("disk-c", "node-1", "disk", "Active"),
        ];
        let got = select(&spc, &inventory, &[], 1).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].disk_groups.len(), 1);
        assert_eq!(got[0].disk_groups[0].len(), 2);
    }

    #[test]
    fn partial_selection_is_not_an_error() {
        let spc = claim("disk", "striped", Some(5), None);
        let inventory = vec![disk("disk-a", "node-1", "disk", "Active")];
        let got = select(&spc, &inventory, &[], 5).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn manual_host_must_chunk_exactly() {
        // three listed disks on one host cannot form mirrored groups
        let spc = claim(
            "disk",
            "mirrored",
            None,
            Some(vec!["disk-a", "disk-b", "disk-c"]),
        );
        let inventory = vec![
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-1", "disk", "Active"),
            disk("disk-c", "node-1", "disk", "Active"),
        ];
        let got = select(&spc, &inventory, &[], 1).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn manual_chunks_listed_disks_per_host() {
        let spc = claim(
            "disk",
            "mirrored",
            None,
            Some(vec!["disk-a", "disk-b", "disk-c", "disk-d"]),
        );
        let inventory = vec![
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-1", "disk", "Active"),
            disk("disk-c", "node-2", "disk", "Active"),
            disk("disk-d", "node-2", "disk", "Active"),
        ];
        let got = select(&spc, &inventory, &[], 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].host, "node-1");
        assert_eq!(got[0].disk_groups, vec![vec![
            SelectedDisk {
                name: "disk-a".to_string(),
                device_id: "/dev/disk/by-id/disk-a".to_string(),
            },
            SelectedDisk {
                name: "disk-b".to_string(),
                device_id: "/dev/disk/by-id/disk-b".to_string(),
            },
        ]]);
        assert_eq!(got[1].host, "node-2");
    }

    #[test]
    fn manual_ignores_unknown_disks() {
        let spc = claim("disk", "striped", None, Some(vec!["disk-a", "ghost"]));
        let inventory = vec![disk("disk-a", "node-1", "disk", "Active")];
        let got = select(&spc, &inventory, &[], 2).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].disk_groups.len(), 1);
    }

    #[test]
    fn striped_groups_are_single_disk() {
        let spc = claim("disk", "striped", Some(1), None);
        let inventory = vec![
            disk("disk-a", "node-1", "disk", "Active"),
            disk("disk-b", "node-1", "disk", "Active"),
        ];
        let got = select(&spc, &inventory, &[], 1).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].disk_groups.len(), 2);
        assert!(got[0].disk_groups.iter().all(|g| g.len() == 1));
    }
}
