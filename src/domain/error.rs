//! Core error taxonomy
//!
//! Every fallible operation in the crate returns [`CoreResult`]. The
//! coordinator consults [`CoreError::is_retryable`] to decide between
//! rollback-and-retry and rollback-and-propagate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Malformed input or business-rule violation
    #[error("Validation: {0}")]
    Validation(String),

    #[error("Not found: {entity} with id={id}")]
    NotFound { entity: &'static str, id: String },

    /// Illegal state-machine edge
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Actor class not allowed to drive this edge
    #[error("Unauthorized: {actor} may not {action}")]
    Unauthorized { actor: String, action: String },

    /// Concurrent write detected via the optimistic version token
    #[error("Version conflict on {entity} id={id}")]
    VersionConflict { entity: &'static str, id: String },

    /// Cycle found in the wait-for graph
    #[error("Deadlock detected for transaction {transaction_id}")]
    DeadlockDetected { transaction_id: Uuid },

    /// Transaction exceeded its wall-clock budget
    #[error("Transaction timed out after {elapsed_ms}ms")]
    TransactionTimeout { elapsed_ms: u64 },

    /// Storage-level serialization failure (isolation-level conflict)
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// A sub-operation was recorded but never marked executed; commit refused
    #[error("Transaction context {transaction_id} has unexecuted sub-operations")]
    ContextIncomplete { transaction_id: Uuid },

    /// Automatic resolution is withheld; the admin override path takes over
    #[error("Resolution deferred for conflict {conflict_id}: {reason}")]
    ResolutionDeferred { conflict_id: Uuid, reason: String },

    /// No viable resolution strategy remained
    #[error("Resolution failed for conflict {conflict_id}: {reason}")]
    ResolutionFailure { conflict_id: Uuid, reason: String },

    /// A collaborator failed after others succeeded; compensation was issued
    #[error("Distributed transaction aborted at step '{failed_step}' ({compensated} compensated)")]
    DistributedAborted {
        failed_step: String,
        compensated: usize,
    },

    /// Persistence gateway failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Whether the coordinator may roll back and retry the enclosing
    /// transaction. Everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::VersionConflict { .. }
                | CoreError::DeadlockDetected { .. }
                | CoreError::TransactionTimeout { .. }
                | CoreError::SerializationFailure(..)
        )
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::VersionConflict {
            entity: "reservation",
            id: "r1".into()
        }
        .is_retryable());
        assert!(CoreError::DeadlockDetected {
            transaction_id: Uuid::new_v4()
        }
        .is_retryable());
        assert!(CoreError::TransactionTimeout { elapsed_ms: 10 }.is_retryable());
        assert!(CoreError::SerializationFailure("write skew".into()).is_retryable());
    }

    #[test]
    fn non_retryable_classification() {
        assert!(!CoreError::Validation("bad input".into()).is_retryable());
        assert!(!CoreError::InvalidTransition {
            from: "completed".into(),
            to: "requested".into()
        }
        .is_retryable());
        assert!(!CoreError::Storage("disk full".into()).is_retryable());
        assert!(!CoreError::ResolutionDeferred {
            conflict_id: Uuid::new_v4(),
            reason: "manual hold".into()
        }
        .is_retryable());
    }
}
