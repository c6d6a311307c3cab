//! Pool-count arithmetic and claim validation
//!
//! Pure functions: the reconciler feeds them the claim and the number of
//! pools already provisioned, and they answer how many more are owed.

use crate::crd::{PoolType, StoragePoolClaim};
use crate::error::{Error, Result};

/// Disk families a claim may draw from.
const VALID_TYPES: [&str; 2] = ["disk", "sparse"];

/// Semantic validation of a claim. Failures are permanent: the claim has to
/// be edited before reconciliation can make progress, so the caller records
/// the reason and does not requeue.
pub fn validate(spc: &StoragePoolClaim) -> Result<()> {
    let name = spc.metadata.name.as_deref().unwrap_or_default();

    if spc.pool_type().is_none() {
        return Err(Error::Validation {
            name: name.to_string(),
            reason: format!(
                "got invalid pool type {:?}, want one of striped, mirrored, raidz, raidz2",
                spc.spec.pool_spec.pool_type
            ),
        });
    }

    if !VALID_TYPES.contains(&spc.spec.r#type.as_str()) {
        return Err(Error::Validation {
            name: name.to_string(),
            reason: format!(
                "got invalid storage type {:?}, want disk or sparse",
                spc.spec.r#type
            ),
        });
    }

    if spc.is_auto() {
        match spc.spec.max_pools {
            None => {
                return Err(Error::Validation {
                    name: name.to_string(),
                    reason: "auto provisioning requires maxPools".to_string(),
                })
            }
            Some(n) if n < 0 => {
                return Err(Error::Validation {
                    name: name.to_string(),
                    reason: format!("got negative maxPools {n}"),
                })
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// How many pools this claim still owes, given how many already exist.
///
/// Auto mode is capped by `maxPools`; manual mode by how many full RAID
/// groups the listed disks can form. Both clamp at zero: surplus pools are
/// never reclaimed here.
pub fn pending_pool_count(spc: &StoragePoolClaim, current: usize) -> Result<usize> {
    if spc.is_manual() {
        let pool_type = require_pool_type(spc)?;
        let group_size = pool_type.default_disk_count();
        let target = spc.disk_list().len() / group_size;
        Ok(target.saturating_sub(current))
    } else {
        let max_pools = spc.spec.max_pools.ok_or_else(|| Error::Validation {
            name: spc.metadata.name.clone().unwrap_or_default(),
            reason: "auto provisioning requires maxPools".to_string(),
        })?;
        if max_pools < 0 {
            return Err(Error::Validation {
                name: spc.metadata.name.clone().unwrap_or_default(),
                reason: format!("got negative maxPools {max_pools}"),
            });
        }
        Ok((max_pools as usize).saturating_sub(current))
    }
}

pub fn is_pool_pending(spc: &StoragePoolClaim, current: usize) -> Result<bool> {
    Ok(pending_pool_count(spc, current)? > 0)
}

pub fn require_pool_type(spc: &StoragePoolClaim) -> Result<PoolType> {
    spc.pool_type().ok_or_else(|| Error::FatalConfig(format!(
        "claim {} carries pool type {:?} with no group size",
        spc.metadata.name.as_deref().unwrap_or_default(),
        spc.spec.pool_spec.pool_type
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PoolAttr, SpcDisks, StoragePoolClaimSpec};

    fn spc(
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

    #[test]
    fn auto_pending_is_max_pools_minus_current() {
        let claim = spc("sparse", "striped", Some(3), None);
        assert_eq!(pending_pool_count(&claim, 0).unwrap(), 3);
        assert_eq!(pending_pool_count(&claim, 2).unwrap(), 1);
        assert!(is_pool_pending(&claim, 0).unwrap());
    }

    #[test]
    fn auto_pending_clamps_at_zero() {
        let claim = spc("sparse", "striped", Some(3), None);
        assert_eq!(pending_pool_count(&claim, 5).unwrap(), 0);
        assert!(!is_pool_pending(&claim, 5).unwrap());
    }

    #[test]
    fn manual_one_disk_cannot_form_a_mirrored_group() {
        let claim = spc("sparse", "mirrored", None, Some(vec!["disk-1"]));
        assert_eq!(pending_pool_count(&claim, 0).unwrap(), 0);
        assert!(!is_pool_pending(&claim, 0).unwrap());
    }

    #[test]
    fn manual_pending_counts_full_groups_only() {
        let claim = spc(
            "disk",
            "mirrored",
            None,
            Some(vec!["disk-1", "disk-2", "disk-3", "disk-4", "disk-5"]),
        );
        assert_eq!(pending_pool_count(&claim, 0).unwrap(), 2);
        assert_eq!(pending_pool_count(&claim, 1).unwrap(), 1);
        assert_eq!(pending_pool_count(&claim, 2).unwrap(), 0);
    }

    #[test]
    fn validate_accepts_well_formed_claims() {
        assert!(validate(&spc("disk", "striped", Some(3), None)).is_ok());
        assert!(validate(&spc("sparse", "raidz2", None, Some(vec!["d1"]))).is_ok());
        assert!(validate(&spc("disk", "mirrored", Some(0), None)).is_ok());
    }

    #[test]
    fn validate_rejects_bad_pool_type() {
        let err = validate(&spc("disk", "raid5", Some(3), None)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = validate(&spc("disk", "", Some(3), None)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn validate_rejects_bad_storage_type() {
        let err = validate(&spc("tape", "striped", Some(3), None)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = validate(&spc("", "striped", Some(3), None)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn validate_requires_max_pools_in_auto_mode() {
        let err = validate(&spc("disk", "striped", None, None)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = validate(&spc("disk", "striped", Some(-1), None)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        // manual mode never needs maxPools
        assert!(validate(&spc("disk", "striped", None, Some(vec!["d1"]))).is_ok());
    }
}
