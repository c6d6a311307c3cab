//! Pool provisioning logic
//!
//! Everything between "a claim was synced" and "a pool request left the
//! building": validation and pool-count arithmetic, node/disk selection,
//! the disk-ops pipeline, and the CasPool artifact emitter.

pub mod caspool;
pub mod math;
pub mod operations;
pub mod select;

#[allow(unused_imports)]
pub use caspool::{build_cas_pool, CasPool, CasPoolEmitter, EmitterConfig};
#[allow(unused_imports)]
pub use math::{is_pool_pending, pending_pool_count, validate};
#[allow(unused_imports)]
pub use operations::PoolConfig;
#[allow(unused_imports)]
pub use select::{select, Allocation, SelectedDisk};
