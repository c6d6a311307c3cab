//! Claim controller
//!
//! Informer intake, the work queue between intake and workers, and the
//! sync handler the workers drive.

pub mod intake;
pub mod queue;
pub mod sync;

#[allow(unused_imports)]
pub use intake::{resync_loop, watch_claims, Intake};
#[allow(unused_imports)]
pub use queue::{EventType, QueueLoad, WorkQueue, MAX_RETRIES};
#[allow(unused_imports)]
pub use sync::{spawn_workers, worker, Metrics, SyncContext};
