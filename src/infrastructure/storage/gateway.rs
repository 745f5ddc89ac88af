//! Persistence gateway trait definitions
//!
//! The core never issues raw storage calls outside these primitives.
//! Snapshot reads live on [`PersistenceGateway`]; all mutation happens
//! through a [`UnitOfWork`] opened at an explicit isolation level and
//! finished with exactly one `commit` or `rollback`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::application::transaction::context::TransactionAuditRecord;
use crate::domain::{
    Conflict, CoreResult, CustomerTier, Reservation, ServiceOffering, TransitionAudit,
};

/// Storage-transaction consistency mode requested for a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
        }
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::ReadCommitted
    }
}

/// Read/write/transaction primitives over reservation, conflict and audit
/// records.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Open a unit of work at the given isolation level.
    async fn begin(&self, isolation: IsolationLevel) -> CoreResult<Arc<dyn UnitOfWork>>;

    // ── Snapshot reads ─────────────────────────────────────────
    // May observe slightly stale state; conflict resolution re-validates
    // inside a fresh unit of work.

    async fn find_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    /// Blocking (requested/confirmed) reservations for a shop and date.
    async fn blocking_reservations(
        &self,
        shop_id: &str,
        date: NaiveDate,
    ) -> CoreResult<Vec<Reservation>>;

    async fn find_service(&self, service_id: &str) -> CoreResult<Option<ServiceOffering>>;

    async fn customer_tier(&self, user_id: &str) -> CoreResult<CustomerTier>;

    async fn find_conflict(&self, id: Uuid) -> CoreResult<Option<Conflict>>;

    /// Unresolved conflicts for a shop and date.
    async fn open_conflicts(&self, shop_id: &str, date: NaiveDate) -> CoreResult<Vec<Conflict>>;

    /// Shop ids with at least one blocking reservation (sweep input).
    async fn active_shops(&self) -> CoreResult<Vec<String>>;
}

/// One atomic unit of work.
///
/// Writes are staged until `commit`; `rollback` discards them. A
/// version-checked reservation write surfaces `VersionConflict` when the
/// stored version no longer matches the loaded one. After `commit` or
/// `rollback` every further call fails.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn isolation(&self) -> IsolationLevel;

    /// Load a reservation and take write intent on its row.
    async fn reservation_for_update(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    async fn insert_reservation(&self, reservation: Reservation) -> CoreResult<Reservation>;

    /// Version-checked update; bumps `version` and `updated_at` on success.
    async fn update_reservation(&self, reservation: Reservation) -> CoreResult<Reservation>;

    async fn conflict_for_update(&self, id: Uuid) -> CoreResult<Option<Conflict>>;

    async fn insert_conflict(&self, conflict: Conflict) -> CoreResult<()>;

    async fn update_conflict(&self, conflict: Conflict) -> CoreResult<()>;

    /// Append one immutable transition audit record.
    async fn append_audit(&self, audit: TransitionAudit) -> CoreResult<()>;

    /// Append a coordinator audit record (sub-operations + outcome).
    async fn append_transaction_audit(&self, record: TransactionAuditRecord) -> CoreResult<()>;

    async fn commit(&self) -> CoreResult<()>;

    async fn rollback(&self) -> CoreResult<()>;
}
