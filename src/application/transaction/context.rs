//! Transaction context
//!
//! Scoped to one coordinator invocation: an ordered log of sub-operations,
//! the retry count, and the terminal outcome. Never persisted beyond audit
//! logging.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::infrastructure::storage::IsolationLevel;

/// Execution status of one sub-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOperationStatus {
    Pending,
    Executed,
    Failed,
}

impl SubOperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }
}

/// One step of a transactional workflow
#[derive(Debug, Clone)]
pub struct SubOperation {
    pub entity: &'static str,
    pub action: &'static str,
    pub payload: Value,
    pub status: SubOperationStatus,
}

/// Terminal status of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOutcome {
    Committed,
    RolledBack,
    Aborted,
}

impl ContextOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Aborted => "aborted",
        }
    }
}

/// Handle to a recorded sub-operation within one attempt
#[derive(Debug, Clone, Copy)]
pub struct OpToken(usize);

/// Per-invocation transaction context.
///
/// Shared by reference into the executed operation; interior mutability
/// keeps the operation signature borrow-friendly.
pub struct TransactionContext {
    id: Uuid,
    isolation: IsolationLevel,
    operations: Mutex<Vec<SubOperation>>,
    retry_count: AtomicU32,
    outcome: Mutex<Option<ContextOutcome>>,
    started_at: DateTime<Utc>,
}

impl TransactionContext {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            isolation,
            operations: Mutex::new(Vec::new()),
            retry_count: AtomicU32::new(0),
            outcome: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    /// Reset the sub-operation log for a fresh attempt. `retries` is the
    /// number of rollbacks that preceded this attempt.
    pub fn begin_attempt(&self, retries: u32) {
        self.operations
            .lock()
            .expect("context op log poisoned")
            .clear();
        self.retry_count.store(retries, Ordering::SeqCst);
    }

    /// Record a sub-operation as pending; mark it once the gateway call
    /// returns.
    pub fn record(&self, entity: &'static str, action: &'static str, payload: Value) -> OpToken {
        let mut ops = self.operations.lock().expect("context op log poisoned");
        ops.push(SubOperation {
            entity,
            action,
            payload,
            status: SubOperationStatus::Pending,
        });
        OpToken(ops.len() - 1)
    }

    pub fn mark_executed(&self, token: OpToken) {
        self.set_status(token, SubOperationStatus::Executed);
    }

    pub fn mark_failed(&self, token: OpToken) {
        self.set_status(token, SubOperationStatus::Failed);
    }

    fn set_status(&self, token: OpToken, status: SubOperationStatus) {
        let mut ops = self.operations.lock().expect("context op log poisoned");
        if let Some(op) = ops.get_mut(token.0) {
            op.status = status;
        }
    }

    /// True when every recorded sub-operation reached `Executed`. The
    /// coordinator refuses to commit otherwise.
    pub fn all_executed(&self) -> bool {
        self.operations
            .lock()
            .expect("context op log poisoned")
            .iter()
            .all(|op| op.status == SubOperationStatus::Executed)
    }

    /// Snapshot of the current attempt's sub-operation log.
    pub fn operations(&self) -> Vec<SubOperation> {
        self.operations
            .lock()
            .expect("context op log poisoned")
            .clone()
    }

    pub fn outcome(&self) -> Option<ContextOutcome> {
        *self.outcome.lock().expect("context outcome poisoned")
    }

    /// Set the terminal outcome. `Committed` is refused while any
    /// sub-operation is unexecuted.
    pub(crate) fn set_outcome(&self, outcome: ContextOutcome) {
        if outcome == ContextOutcome::Committed {
            debug_assert!(self.all_executed(), "committed with pending sub-operations");
        }
        *self.outcome.lock().expect("context outcome poisoned") = Some(outcome);
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("retry_count", &self.retry_count())
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Audit record emitted per coordinator invocation when logging is enabled
#[derive(Debug, Clone)]
pub struct TransactionAuditRecord {
    pub transaction_id: Uuid,
    pub isolation: IsolationLevel,
    pub outcome: ContextOutcome,
    pub retry_count: u32,
    pub operations: Vec<SubOperation>,
    pub recorded_at: DateTime<Utc>,
}

impl TransactionAuditRecord {
    pub fn from_context(ctx: &TransactionContext, outcome: ContextOutcome) -> Self {
        Self {
            transaction_id: ctx.id(),
            isolation: ctx.isolation(),
            outcome,
            retry_count: ctx.retry_count(),
            operations: ctx.operations(),
            recorded_at: Utc::now(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_and_mark_executed() {
        let ctx = TransactionContext::new(IsolationLevel::ReadCommitted);
        let t1 = ctx.record("reservation", "update_status", json!({"to": "confirmed"}));
        let t2 = ctx.record("audit", "append", json!({}));
        assert!(!ctx.all_executed());

        ctx.mark_executed(t1);
        assert!(!ctx.all_executed());

        ctx.mark_executed(t2);
        assert!(ctx.all_executed());
    }

    #[test]
    fn empty_log_counts_as_executed() {
        let ctx = TransactionContext::new(IsolationLevel::Serializable);
        assert!(ctx.all_executed());
    }

    #[test]
    fn begin_attempt_clears_log_and_sets_retries() {
        let ctx = TransactionContext::new(IsolationLevel::ReadCommitted);
        ctx.record("reservation", "update_status", json!({}));
        ctx.begin_attempt(2);
        assert!(ctx.operations().is_empty());
        assert_eq!(ctx.retry_count(), 2);
    }

    #[test]
    fn failed_operation_blocks_all_executed() {
        let ctx = TransactionContext::new(IsolationLevel::ReadCommitted);
        let t = ctx.record("conflict", "update", json!({}));
        ctx.mark_failed(t);
        assert!(!ctx.all_executed());
    }

    #[test]
    fn audit_record_snapshots_context() {
        let ctx = TransactionContext::new(IsolationLevel::RepeatableRead);
        let t = ctx.record("reservation", "insert", json!({"shop": "shop-1"}));
        ctx.mark_executed(t);
        ctx.set_outcome(ContextOutcome::Committed);

        let record = TransactionAuditRecord::from_context(&ctx, ContextOutcome::Committed);
        assert_eq!(record.transaction_id, ctx.id());
        assert_eq!(record.operations.len(), 1);
        assert_eq!(record.outcome, ContextOutcome::Committed);
    }
}
