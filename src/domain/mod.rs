// These are public API re-exports - they may not be used internally yet
#![allow(unused_imports)]

//! Domain Layer
//!
//! Trait abstractions (ports) between the reconciler and its external
//! collaborators: the object store, the disk inventory, pod lookup, and the
//! pool template engine. Adapters in `crate::adapters` implement them
//! against the Kubernetes API; tests plug in in-memory fakes.

pub mod ports;

pub use ports::{
    CasPoolSink, CspStore, DiskInventory, EventRecorder, JsonPatchOp, PatchVerb, PodObservation,
    PodReader, SpcStore,
};
