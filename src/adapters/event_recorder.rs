//! Event Recorder Adapters
//!
//! Implements the `EventRecorder` port with various backends. Warning
//! events land on the claim itself so operators see drops and failures
//! in `kubectl describe spc` without digging through logs.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::StoragePoolClaim;
use crate::domain::ports::EventRecorder;

/// Event recorder backed by the Kubernetes events API.
///
/// Publishing is best effort: a failure to deliver an event is logged and
/// otherwise swallowed so it can never fail the sync that raised it.
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    fn reference(spc: &StoragePoolClaim) -> ObjectReference {
        spc.object_ref(&())
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn warn(&self, spc: &StoragePoolClaim, reason: &str, message: &str) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &Self::reference(spc)).await {
            warn!(
                spc = %spc.metadata.name.as_deref().unwrap_or_default(),
                reason,
                error = %e,
                "failed to publish warning event"
            );
        }
    }
}

/// One recorded event, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub spc: String,
    pub reason: String,
    pub message: String,
}

/// In-memory recorder for testing.
#[derive(Debug, Default)]
pub struct InMemoryEventRecorder {
    events: parking_lot::RwLock<Vec<RecordedEvent>>,
}

#[allow(dead_code)]
impl InMemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Reasons of the events recorded against a specific claim.
    pub fn reasons_for(&self, spc: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.spc == spc)
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for InMemoryEventRecorder {
    async fn warn(&self, spc: &StoragePoolClaim, reason: &str, message: &str) {
        self.events.write().push(RecordedEvent {
            spc: spc.metadata.name.clone().unwrap_or_default(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
