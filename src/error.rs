//! Error types for the cStor SPC operator

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling StoragePoolClaims
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SPC failed schema/semantic validation; never retried
    #[error("invalid StoragePoolClaim {name}: {reason}")]
    Validation { name: String, reason: String },

    /// Lease is held by another live operator replica
    #[error("lease on StoragePoolClaim {0} already acquired by a live pod")]
    LeaseHeld(String),

    /// A disk-ops pipeline step failed; the disk-hash annotation is left
    /// unpatched so the next reconcile retries the whole pipeline
    #[error("disk operations pipeline failed for {spc} at {step}: {source}")]
    Pipeline {
        spc: String,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Impossible invariants, e.g. a pool type with no default group size
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    /// Required environment variable is missing or empty
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True if the underlying store reported the target object missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube(kube::Error::Api(e)) if e.code == 404
        )
    }

    /// True if the underlying store reported an optimistic-concurrency
    /// conflict (resource-version CAS failure).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube(kube::Error::Api(e)) if e.code == 409
        )
    }

    /// Whether the work item that produced this error should be requeued.
    ///
    /// Validation, fatal-config and lease-contention outcomes are terminal
    /// for the current item; conflicts and transient store errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } | Error::FatalConfig(_) | Error::LeaseHeld(_) => false,
            Error::Pipeline { source, .. } => source.is_retryable(),
            Error::Kube(_) => !self.is_not_found(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_classification() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
        assert!(!api_error(500).is_not_found());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
    }

    #[test]
    fn test_retry_policy() {
        // Conflicts and transient store errors requeue.
        assert!(api_error(409).is_retryable());
        assert!(api_error(500).is_retryable());
        // A vanished object is moot.
        assert!(!api_error(404).is_retryable());
        // Validation failures never requeue.
        assert!(!Error::Validation {
            name: "pool1".to_string(),
            reason: "bad pool type".to_string()
        }
        .is_retryable());
        assert!(!Error::LeaseHeld("pool1".to_string()).is_retryable());
        // Pipeline errors inherit the retryability of their cause.
        let p = Error::Pipeline {
            spc: "pool1".to_string(),
            step: "remove-disk",
            source: Box::new(api_error(500)),
        };
        assert!(p.is_retryable());
    }
}
