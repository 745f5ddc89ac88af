//! Distributed transactions across collaborators
//!
//! A workflow spanning more than one logical service (e.g. reservation +
//! loyalty ledger) executes as an ordered list of collaborator operations.
//! If any step fails, compensating calls undo every already-succeeded step
//! in reverse order before the failure is re-raised. Partial success is
//! never a terminal state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{CoreError, CoreResult};

/// One operation addressed to a collaborator
#[derive(Debug, Clone)]
pub struct CollaboratorRequest {
    pub action: String,
    pub payload: Value,
}

impl CollaboratorRequest {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }
}

/// A logical service taking part in a distributed transaction.
///
/// `compensate` must undo the observable effect of a previously successful
/// `execute` for the same request.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn execute(&self, request: &CollaboratorRequest) -> CoreResult<Value>;

    async fn compensate(&self, request: &CollaboratorRequest) -> CoreResult<()>;
}

/// One step of a distributed transaction
pub struct DistributedStep {
    pub collaborator_id: String,
    pub collaborator: Arc<dyn Collaborator>,
    pub request: CollaboratorRequest,
}

impl DistributedStep {
    pub fn new(
        collaborator_id: impl Into<String>,
        collaborator: Arc<dyn Collaborator>,
        request: CollaboratorRequest,
    ) -> Self {
        Self {
            collaborator_id: collaborator_id.into(),
            collaborator,
            request,
        }
    }
}

/// Terminal status of a distributed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributedStatus {
    Committed,
    Compensated,
}

/// Report of a finished distributed transaction
#[derive(Debug, Clone)]
pub struct DistributedOutcome {
    pub id: Uuid,
    pub status: DistributedStatus,
    pub executed: Vec<String>,
    pub results: Vec<Value>,
}

/// Execute `steps` in order; on the first failure, compensate every
/// already-succeeded step in reverse order, then raise
/// `DistributedAborted`. Steps after the failed one are never invoked.
///
/// A compensation failure is logged and counted but does not stop the
/// remaining compensations; the collaborator is expected to reconcile
/// out of band.
pub async fn execute_distributed_transaction(
    steps: Vec<DistributedStep>,
) -> CoreResult<DistributedOutcome> {
    let id = Uuid::new_v4();
    let mut executed: Vec<&DistributedStep> = Vec::with_capacity(steps.len());
    let mut results: Vec<Value> = Vec::with_capacity(steps.len());

    for step in &steps {
        match step.collaborator.execute(&step.request).await {
            Ok(result) => {
                info!(
                    distributed_tx = %id,
                    collaborator = %step.collaborator_id,
                    action = %step.request.action,
                    "Distributed step succeeded"
                );
                executed.push(step);
                results.push(result);
            }
            Err(err) => {
                warn!(
                    distributed_tx = %id,
                    collaborator = %step.collaborator_id,
                    action = %step.request.action,
                    error = %err,
                    "Distributed step failed, compensating"
                );

                let mut compensated = 0usize;
                for done in executed.iter().rev() {
                    match done.collaborator.compensate(&done.request).await {
                        Ok(()) => {
                            compensated += 1;
                            info!(
                                distributed_tx = %id,
                                collaborator = %done.collaborator_id,
                                "Compensation applied"
                            );
                        }
                        Err(comp_err) => {
                            // Left to out-of-band reconciliation.
                            error!(
                                distributed_tx = %id,
                                collaborator = %done.collaborator_id,
                                error = %comp_err,
                                "Compensation failed"
                            );
                        }
                    }
                }

                return Err(CoreError::DistributedAborted {
                    failed_step: step.collaborator_id.clone(),
                    compensated,
                });
            }
        }
    }

    Ok(DistributedOutcome {
        id,
        status: DistributedStatus::Committed,
        executed: executed
            .iter()
            .map(|s| s.collaborator_id.clone())
            .collect(),
        results,
    })
}

// ── Tests ──────────────────────────────────────────────────────
