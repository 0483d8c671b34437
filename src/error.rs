//! Error types for the mon operator.
//!
//! All fallible operations return [`Result`], whose error type is the single
//! [`Error`] enum below. Errors are grouped by the collaborator that produced
//! them:
//!
//! - **Kubernetes**: API failures from `kube`, classified with [`Error::is_not_found`]
//! - **Quorum**: status queries and membership removal against the storage cluster
//! - **Daemon lifecycle**: placement, deployments, endpoints and config persistence
//! - **Rollout**: a rolling update that failed in a specific [`RolloutPhase`]
//!
//! # Example
//!
//! ```rust
//! use mon_operator::error::Error;
//!
//! let err = Error::QuorumStatus("connection refused".into());
//! assert!(err.is_retryable());
//! assert!(!err.is_not_found());
//! ```

use std::io;
use thiserror::Error;

use crate::rolling::RolloutPhase;

/// Main error type for the operator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Quorum errors
    #[error("Failed to get mon status: {0}")]
    QuorumStatus(String),

    #[error("Failed to remove mon {name} from quorum: {reason}")]
    QuorumRemoval { name: String, reason: String },

    #[error("Ceph command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    // Daemon lifecycle errors
    #[error("Failed to place mon {name}: {reason}")]
    Placement { name: String, reason: String },

    #[error("Mon {0} doesn't exist in assignment map")]
    NotAssigned(String),

    #[error("Daemon lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Failed to start mon {name}: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Config persistence error: {0}")]
    Persistence(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Rolling update errors
    #[error("Rolling update of {resource} failed while {phase}: {reason}")]
    Rollout {
        resource: String,
        phase: RolloutPhase,
        reason: String,
    },

    #[error("Verification rejected: {0}")]
    Verification(String),

    // Configuration errors
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if error is transient and the next reconcile may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::QuorumStatus(_) | Error::Timeout(_) | Error::Command { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code >= 500 || resp.code == 429,
            Error::Kube(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for operator operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_classification() {
        assert!(api_error(404).is_not_found());
        assert!(Error::NotFound("mon-a".into()).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::Lifecycle("x".into()).is_not_found());
    }

    #[test]
    fn test_retryable() {
        assert!(api_error(503).is_retryable());
        assert!(!api_error(400).is_retryable());
        assert!(Error::QuorumStatus("down".into()).is_retryable());
        assert!(!Error::InvalidConfig {
            field: "cluster_name".into(),
            reason: "empty".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_rollout_message_names_phase() {
        let err = Error::Rollout {
            resource: "nfs-a".into(),
            phase: RolloutPhase::Polling,
            reason: "gave up waiting".into(),
        };
        assert_eq!(
            err.to_string(),
            "Rolling update of nfs-a failed while polling for completion: gave up waiting"
        );
    }
}
