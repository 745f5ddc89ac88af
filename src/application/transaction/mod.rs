//! Transaction coordination: atomic units of work, retry/backoff,
//! deadlock detection and distributed (compensating) transactions

pub mod context;
pub mod coordinator;
pub mod deadlock;
pub mod distributed;

pub use context::{
    ContextOutcome, OpToken, SubOperation, SubOperationStatus, TransactionAuditRecord,
    TransactionContext,
};
pub use coordinator::{backoff_delay, TransactionCoordinator, TransactionOptions};
pub use deadlock::{DeadlockDetector, ResourceKey};
pub use distributed::{
    execute_distributed_transaction, Collaborator, CollaboratorRequest, DistributedOutcome,
    DistributedStatus, DistributedStep,
};
