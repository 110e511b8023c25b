//! Reconciliation error types
//!
//! Errors are classified by how a tick recovers from them. Everything except
//! [`ReconcileError::Invariant`] is handled inside the tick and retried on the
//! next one.

use dbop_types::{ActionType, DeploymentId, MemberId, ModelError};
use thiserror::Error;

/// Errors returned by external stores and clients
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Benign for delete-style operations
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict: expected {expected}, actual {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Coordination layer unavailable: {ready} of {total} agents ready")]
    CoordinationUnavailable { ready: usize, total: usize },

    /// A plan fragment asked for coordination state that was not read yet
    #[error("Coordination layer state not loaded")]
    CoordinationNotLoaded,

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Status version conflict: expected {expected}, actual {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Action {action} aborted: {reason}")]
    ActionAborted { action: ActionType, reason: String },

    #[error("Action {action} timed out after {elapsed_secs}s")]
    ActionTimeout {
        action: ActionType,
        elapsed_secs: u64,
    },

    #[error("Member model invariant violated: {0}")]
    Invariant(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Deployment not found: {0}")]
    NotFound(DeploymentId),

    #[error("Render failed for member {member}: {reason}")]
    Render { member: MemberId, reason: String },
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, actual } => {
                ReconcileError::Conflict { expected, actual }
            }
            StoreError::Timeout(op) => ReconcileError::Transient(format!("timeout: {op}")),
            other => ReconcileError::Store(other),
        }
    }
}

impl ReconcileError {
    pub fn aborted(action: ActionType, reason: impl Into<String>) -> Self {
        ReconcileError::ActionAborted {
            action,
            reason: reason.into(),
        }
    }

    /// Retried on the next tick without any user-visible effect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Transient(_)
                | ReconcileError::Store(_)
                | ReconcileError::Conflict { .. }
        )
    }

    /// Planning has to read the coordination layer and start over.
    pub fn needs_coordination(&self) -> bool {
        matches!(self, ReconcileError::CoordinationNotLoaded)
    }

    pub fn is_quorum_unavailable(&self) -> bool {
        matches!(self, ReconcileError::CoordinationUnavailable { .. })
    }

    /// Stops all mutation of the deployment until corrected.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Invariant(_))
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let conflict: ReconcileError = StoreError::Conflict {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(conflict, ReconcileError::Conflict { expected: 1, actual: 2 }));
        assert!(conflict.is_transient());

        let timeout: ReconcileError = StoreError::Timeout("create".into()).into();
        assert!(timeout.is_transient());

        let invariant: ReconcileError =
            ModelError::DuplicateMember(MemberId::new("AGNT-1")).into();
        assert!(invariant.is_fatal());
        assert!(!invariant.is_transient());
    }
}
