//! Disk-ops pipeline
//!
//! Runs when the disk-hash annotation on a claim no longer matches its disk
//! list. Walks a fixed sequence of steps over the claim's pools, persisting
//! mutated pools after each step. Removals run before additions so that
//! vacated slots are available to disk replacement, and pool expansion only
//! consumes disks no earlier step placed.

use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};

use crate::crd::{
    CStorPool, CspDisk, CstorOperation, DiskGroup, OperationAction, OperationStatus,
    StoragePoolClaim, HOSTNAME_LABEL,
};
use crate::domain::ports::{CspStore, DiskInventory};
use crate::error::{Error, Result};
use crate::pool::math::require_pool_type;

/// The steps, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RemoveDisk,
    DeletePool,
    ReattachDisk,
    ReplaceDisk,
    ExpandPool,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::RemoveDisk => "remove-disk",
            Step::DeletePool => "delete-pool",
            Step::ReattachDisk => "reattach-disk",
            Step::ReplaceDisk => "replace-disk",
            Step::ExpandPool => "expand-pool",
        }
    }
}

const PIPELINE: [Step; 5] = [
    Step::RemoveDisk,
    Step::DeletePool,
    Step::ReattachDisk,
    Step::ReplaceDisk,
    Step::ExpandPool,
];

/// Per-sync working set: the claim and its pools. Built fresh for every
/// pipeline run, discarded afterwards.
#[derive(Debug)]
pub struct PoolConfig {
    pub spc: StoragePoolClaim,
    pub csps: Vec<CStorPool>,
    dirty: HashSet<String>,
}

impl PoolConfig {
    pub fn new(spc: StoragePoolClaim, csps: Vec<CStorPool>) -> PoolConfig {
        PoolConfig {
            spc,
            csps,
            dirty: HashSet::new(),
        }
    }

    fn spc_disks(&self) -> HashSet<&str> {
        self.spc.disk_list().iter().map(String::as_str).collect()
    }

    fn csp_disks(&self) -> HashSet<String> {
        self.csps
            .iter()
            .flat_map(|c| c.disk_names().map(String::from))
            .collect()
    }

    /// Disks some pool still carries but the claim no longer lists.
    fn removed_disks(&self) -> Vec<String> {
        let spc_disks = self.spc_disks();
        let mut removed: Vec<String> = self
            .csp_disks()
            .into_iter()
            .filter(|d| !spc_disks.contains(d.as_str()))
            .collect();
        removed.sort();
        removed
    }

    /// Disks the claim lists but no pool carries yet.
    fn added_disks(&self) -> Vec<String> {
        let csp_disks = self.csp_disks();
        self.spc
            .disk_list()
            .iter()
            .filter(|d| !csp_disks.contains(*d))
            .cloned()
            .collect()
    }

    fn mark_dirty(&mut self, csp_name: &str) {
        self.dirty.insert(csp_name.to_string());
    }

    fn set_in_use(&mut self, disk_name: &str, in_use: bool) {
        for csp in &mut self.csps {
            let name = csp.metadata.name.clone().unwrap_or_default();
            let mut touched = false;
            for group in &mut csp.spec.group {
                for slot in &mut group.item {
                    if slot.name == disk_name && slot.in_use_by_pool != in_use {
                        slot.in_use_by_pool = in_use;
                        touched = true;
                    }
                }
            }
            if touched {
                self.dirty.insert(name);
            }
        }
    }
}

/// Run the full pipeline, persisting mutated pools after every step. A
/// persist failure aborts the remaining steps; the caller must then leave
/// the disk-hash annotation untouched so the next reconcile retries.
pub async fn run<C, D>(mut pc: PoolConfig, csp_store: &C, inventory: &D) -> Result<PoolConfig>
where
    C: CspStore + ?Sized,
    D: DiskInventory + ?Sized,
{
    for step in PIPELINE {
        match step {
            Step::RemoveDisk => remove_disk(&mut pc),
            Step::DeletePool => delete_pool(&mut pc),
            Step::ReattachDisk => reattach_disk(&mut pc),
            Step::ReplaceDisk => replace_disk(&mut pc, inventory).await?,
            Step::ExpandPool => expand_pool(&mut pc, inventory).await?,
        }
        persist(&mut pc, csp_store, step).await?;
    }
    Ok(pc)
}

/// Detach every slot whose disk left the claim, recording a DiskRemove work
/// order for the pool agent. Slot identity stays so a later replace can
/// reuse it.
fn remove_disk(pc: &mut PoolConfig) {
    for disk in pc.removed_disks() {
        pc.set_in_use(&disk, false);
        for i in 0..pc.csps.len() {
            let Some(device_id) = device_id_of_slot(&pc.csps[i], &disk) else {
                continue;
            };
            // Any prior removal of this device counts, whatever its status:
            // a Done record means the agent already detached it, and the
            // slot keeps reporting the disk until a replace overwrites it.
            let already_queued = pc.csps[i].spec.operations.iter().any(|op| {
                op.action == OperationAction::DiskRemove && op.old_disk == device_id
            });
            if !already_queued {
                let op = CstorOperation::disk_remove(device_id);
                pc.csps[i].spec.operations.push(op);
                let name = pc.csps[i].metadata.name.clone().unwrap_or_default();
                pc.mark_dirty(&name);
            }
        }
        info!(disk = %disk, "detached disk removed from claim");
    }
}

/// Queue deletion of every pool that lost a top-level vdev.
fn delete_pool(pc: &mut PoolConfig) {
    for csp in &mut pc.csps {
        if !csp.is_top_vdev_lost() {
            continue;
        }
        let pending_delete = csp.spec.operations.iter().any(|op| {
            op.action == OperationAction::PoolDelete && op.status != OperationStatus::Done
        });
        if pending_delete {
            continue;
        }
        let name = csp.metadata.name.clone().unwrap_or_default();
        warn!(csp = %name, "top-level vdev lost, queueing pool deletion");
        csp.spec.operations.push(CstorOperation::pool_delete());
        pc.dirty.insert(name);
    }
}

/// Re-attach detached slots whose disk is back on the claim.
fn reattach_disk(pc: &mut PoolConfig) {
    let spc_disks: Vec<String> = pc.spc.disk_list().to_vec();
    let to_reattach: Vec<String> = pc
        .csps
        .iter()
        .flat_map(|c| c.spec.group.iter())
        .flat_map(|g| g.item.iter())
        .filter(|s| !s.in_use_by_pool && spc_disks.contains(&s.name))
        .map(|s| s.name.clone())
        .collect();
    for disk in to_reattach {
        pc.set_in_use(&disk, true);
        info!(disk = %disk, "re-attached disk listed on claim again");
    }
}

/// Place each newly listed disk into the first vacated slot anywhere,
/// overwriting the slot identity and queueing a DiskReplace work order.
async fn replace_disk<D>(pc: &mut PoolConfig, inventory: &D) -> Result<()>
where
    D: DiskInventory + ?Sized,
{
    for disk_name in pc.added_disks() {
        let Some((csp_idx, group_idx, slot_idx)) = first_detached_slot(&pc.csps) else {
            break;
        };
        let new_device_id = match inventory.get(&disk_name).await? {
            Some(disk) => disk.device_id().to_string(),
            None => {
                warn!(disk = %disk_name, "added disk not found in inventory, skipping replace");
                continue;
            }
        };
        let csp = &mut pc.csps[csp_idx];
        let slot = &mut csp.spec.group[group_idx].item[slot_idx];
        let old_device_id = slot.device_id.clone();
        slot.name = disk_name.clone();
        slot.device_id = new_device_id.clone();
        slot.in_use_by_pool = true;
        csp.spec
            .operations
            .push(CstorOperation::disk_replace(old_device_id, new_device_id));
        let name = csp.metadata.name.clone().unwrap_or_default();
        info!(csp = %name, disk = %disk_name, "replaced detached slot with new disk");
        pc.mark_dirty(&name);
    }
    Ok(())
}

/// Append full new groups to pools on hosts that received enough new disks,
/// queueing a PoolExpand work order carrying the device ids.
async fn expand_pool<D>(pc: &mut PoolConfig, inventory: &D) -> Result<()>
where
    D: DiskInventory + ?Sized,
{
    let pool_type = require_pool_type(&pc.spc)?;
    let group_size = pool_type.default_disk_count();

    let mut host_disks: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for disk_name in pc.added_disks() {
        let Some(disk) = inventory.get(&disk_name).await? else {
            warn!(disk = %disk_name, "added disk not found in inventory, skipping expand");
            continue;
        };
        let Some(host) = disk.hostname() else {
            warn!(disk = %disk_name, "added disk carries no hostname label");
            continue;
        };
        host_disks
            .entry(host.to_string())
            .or_default()
            .push((disk_name, disk.device_id().to_string()));
    }

    for (host, disks) in host_disks {
        if disks.len() < group_size {
            continue;
        }
        let Some(csp) = pc
            .csps
            .iter_mut()
            .find(|c| c.label(HOSTNAME_LABEL) == Some(host.as_str()))
        else {
            continue;
        };
        let mut device_ids = Vec::new();
        for chunk in disks.chunks_exact(group_size) {
            let item: Vec<CspDisk> = chunk
                .iter()
                .map(|(name, device_id)| CspDisk {
                    name: name.clone(),
                    device_id: device_id.clone(),
                    in_use_by_pool: true,
                })
                .collect();
            device_ids.extend(chunk.iter().map(|(_, id)| id.clone()));
            csp.spec.group.push(DiskGroup { item });
        }
        csp.spec
            .operations
            .push(CstorOperation::pool_expand(device_ids));
        let name = csp.metadata.name.clone().unwrap_or_default();
        info!(csp = %name, host = %host, "expanded pool with new disk groups");
        pc.dirty.insert(name);
    }
    Ok(())
}

/// Write back every pool the step touched, clearing the dirty set. Errors
/// abort the pipeline with the failing step attached.
async fn persist<C>(pc: &mut PoolConfig, csp_store: &C, step: Step) -> Result<()>
where
    C: CspStore + ?Sized,
{
    let dirty = std::mem::take(&mut pc.dirty);
    for csp in &mut pc.csps {
        let name = csp.metadata.name.clone().unwrap_or_default();
        if !dirty.contains(&name) {
            continue;
        }
        match csp_store.update(csp).await {
            Ok(updated) => *csp = updated,
            Err(e) => {
                return Err(Error::Pipeline {
                    spc: pc.spc.metadata.name.clone().unwrap_or_default(),
                    step: step.name(),
                    source: Box::new(e),
                })
            }
        }
    }
    Ok(())
}

fn device_id_of_slot(csp: &CStorPool, disk_name: &str) -> Option<String> {
    csp.spec
        .group
        .iter()
        .flat_map(|g| g.item.iter())
        .find(|s| s.name == disk_name)
        .map(|s| s.device_id.clone())
}

fn first_detached_slot(csps: &[CStorPool]) -> Option<(usize, usize, usize)> {
    for (i, csp) in csps.iter().enumerate() {
        for (j, group) in csp.spec.group.iter().enumerate() {
            for (k, slot) in group.item.iter().enumerate() {
                if !slot.in_use_by_pool {
                    return Some((i, j, k));
                }
            }
        }
    }
    None
}
