//! Infrastructure Adapters
//!
//! Concrete implementations of the domain ports:
//!
//! - [`kubernetes`]: claim, pool, disk and pod ports against the apiserver
//! - [`caspool_sink`]: provisioning-request sinks (logging, in-memory)
//! - [`event_recorder`]: warning-event recorders (events API, in-memory)

pub mod caspool_sink;
pub mod event_recorder;
pub mod kubernetes;

#[allow(unused_imports)]
pub use caspool_sink::{InMemoryCasPoolSink, LoggingCasPoolSink};
#[allow(unused_imports)]
pub use event_recorder::{InMemoryEventRecorder, KubeEventRecorder, RecordedEvent};
#[allow(unused_imports)]
pub use kubernetes::{KubeCspStore, KubeDiskInventory, KubePodReader, KubeSpcStore};
