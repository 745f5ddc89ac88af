//! In-memory persistence gateway for development and testing
//!
//! Committed state lives in DashMaps; each unit of work stages its writes
//! privately and applies them on commit. Row-level write intent is tracked
//! so concurrent units of work contending for the same reservation surface
//! `SerializationFailure` (or `DeadlockDetected` when a wait-for cycle
//! forms) instead of silently interleaving.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::gateway::{IsolationLevel, PersistenceGateway, UnitOfWork};
use crate::application::transaction::context::TransactionAuditRecord;
use crate::application::transaction::deadlock::{DeadlockDetector, ResourceKey};
use crate::domain::{
    Conflict, CoreError, CoreResult, CustomerTier, Reservation, ServiceOffering, TransitionAudit,
};

struct Shared {
    reservations: DashMap<Uuid, Reservation>,
    conflicts: DashMap<Uuid, Conflict>,
    services: DashMap<String, ServiceOffering>,
    tiers: DashMap<String, CustomerTier>,
    transition_audits: Mutex<Vec<TransitionAudit>>,
    transaction_audits: Mutex<Vec<TransactionAuditRecord>>,
    /// reservation id -> unit of work currently staging a write to it
    row_locks: DashMap<Uuid, Uuid>,
}

/// In-memory [`PersistenceGateway`]
#[derive(Clone)]
pub struct InMemoryGateway {
    shared: Arc<Shared>,
    detector: Option<Arc<DeadlockDetector>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                reservations: DashMap::new(),
                conflicts: DashMap::new(),
                services: DashMap::new(),
                tiers: DashMap::new(),
                transition_audits: Mutex::new(Vec::new()),
                transaction_audits: Mutex::new(Vec::new()),
                row_locks: DashMap::new(),
            }),
            detector: None,
        }
    }

    /// Route write-write contention through a shared deadlock detector.
    pub fn with_deadlock_detector(mut self, detector: Arc<DeadlockDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    // ── Seeding (tests / development) ──────────────────────────

    pub fn seed_reservation(&self, reservation: Reservation) {
        self.shared
            .reservations
            .insert(reservation.id, reservation);
    }

    pub fn seed_service(&self, service: ServiceOffering) {
        self.shared
            .services
            .insert(service.service_id.clone(), service);
    }

    pub fn seed_tier(&self, user_id: impl Into<String>, tier: CustomerTier) {
        self.shared.tiers.insert(user_id.into(), tier);
    }

    pub fn seed_conflict(&self, conflict: Conflict) {
        self.shared.conflicts.insert(conflict.id, conflict);
    }

    // ── Inspection (tests) ─────────────────────────────────────

    pub fn transition_audits(&self) -> Vec<TransitionAudit> {
        self.shared
            .transition_audits
            .lock()
            .expect("audit log poisoned")
            .clone()
    }

    pub fn transaction_audits(&self) -> Vec<TransactionAuditRecord> {
        self.shared
            .transaction_audits
            .lock()
            .expect("audit log poisoned")
            .clone()
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn begin(&self, isolation: IsolationLevel) -> CoreResult<Arc<dyn UnitOfWork>> {
        Ok(Arc::new(InMemoryUnitOfWork {
            tx_id: Uuid::new_v4(),
            isolation,
            shared: self.shared.clone(),
            detector: self.detector.clone(),
            state: Mutex::new(TxState::default()),
        }))
    }

    async fn find_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        Ok(self.shared.reservations.get(&id).map(|r| r.clone()))
    }

    async fn blocking_reservations(
        &self,
        shop_id: &str,
        date: NaiveDate,
    ) -> CoreResult<Vec<Reservation>> {
        let mut rows: Vec<Reservation> = self
            .shared
            .reservations
            .iter()
            .filter(|r| r.shop_id == shop_id && r.date == date && r.is_blocking())
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        Ok(rows)
    }

    async fn find_service(&self, service_id: &str) -> CoreResult<Option<ServiceOffering>> {
        Ok(self.shared.services.get(service_id).map(|s| s.clone()))
    }

    async fn customer_tier(&self, user_id: &str) -> CoreResult<CustomerTier> {
        Ok(self
            .shared
            .tiers
            .get(user_id)
            .map(|t| *t)
            .unwrap_or_default())
    }

    async fn find_conflict(&self, id: Uuid) -> CoreResult<Option<Conflict>> {
        Ok(self.shared.conflicts.get(&id).map(|c| c.clone()))
    }

    async fn open_conflicts(&self, shop_id: &str, date: NaiveDate) -> CoreResult<Vec<Conflict>> {
        let mut rows: Vec<Conflict> = self
            .shared
            .conflicts
            .iter()
            .filter(|c| c.shop_id == shop_id && c.date == date && !c.is_resolved())
            .map(|c| c.clone())
            .collect();
        rows.sort_by_key(|c| (c.detected_at, c.id));
        Ok(rows)
    }

    async fn active_shops(&self) -> CoreResult<Vec<String>> {
        let mut shops: Vec<String> = self
            .shared
            .reservations
            .iter()
            .filter(|r| r.is_blocking())
            .map(|r| r.shop_id.clone())
            .collect();
        shops.sort();
        shops.dedup();
        Ok(shops)
    }
}

#[derive(Default)]
struct TxState {
    staged_reservations: HashMap<Uuid, Reservation>,
    staged_conflicts: HashMap<Uuid, Conflict>,
    staged_transition_audits: Vec<TransitionAudit>,
    staged_transaction_audits: Vec<TransactionAuditRecord>,
    locks_held: HashSet<Uuid>,
    finished: bool,
}

struct InMemoryUnitOfWork {
    tx_id: Uuid,
    isolation: IsolationLevel,
    shared: Arc<Shared>,
    detector: Option<Arc<DeadlockDetector>>,
    state: Mutex<TxState>,
}

impl InMemoryUnitOfWork {
    fn state(&self) -> std::sync::MutexGuard<'_, TxState> {
        self.state.lock().expect("unit of work state poisoned")
    }

    fn ensure_open(state: &TxState) -> CoreResult<()> {
        if state.finished {
            return Err(CoreError::Storage(
                "unit of work already committed or rolled back".into(),
            ));
        }
        Ok(())
    }

    /// Take the write lock for a reservation row, or fail with a retryable
    /// error when another live unit of work already staged a write to it.
    fn lock_row(&self, state: &mut TxState, id: Uuid) -> CoreResult<()> {
        if state.locks_held.contains(&id) {
            return Ok(());
        }

        let resource = ResourceKey::reservation(id);
        let entry = self.shared.row_locks.entry(id).or_insert(self.tx_id);
        let holder = *entry.value();
        drop(entry);

        if holder != self.tx_id {
            if let Some(detector) = &self.detector {
                // A cycle turns the wait into DeadlockDetected right here.
                detector.check_wait(self.tx_id, resource)?;
            }
            return Err(CoreError::SerializationFailure(format!(
                "reservation {id} is write-locked by a concurrent transaction"
            )));
        }

        if let Some(detector) = &self.detector {
            detector.register_hold(self.tx_id, resource);
        }
        state.locks_held.insert(id);
        Ok(())
    }

    fn release_locks(&self, state: &mut TxState) {
        for id in state.locks_held.drain() {
            self.shared
                .row_locks
                .remove_if(&id, |_, holder| *holder == self.tx_id);
        }
        if let Some(detector) = &self.detector {
            detector.release(self.tx_id);
        }
    }

    fn current_version(&self, state: &TxState, id: Uuid) -> Option<u64> {
        if let Some(staged) = state.staged_reservations.get(&id) {
            return Some(staged.version);
        }
        self.shared.reservations.get(&id).map(|r| r.version)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn reservation_for_update(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        if let Some(staged) = state.staged_reservations.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let Some(row) = self.shared.reservations.get(&id).map(|r| r.clone()) else {
            return Ok(None);
        };
        self.lock_row(&mut state, id)?;
        Ok(Some(row))
    }

    async fn insert_reservation(&self, reservation: Reservation) -> CoreResult<Reservation> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        if self.shared.reservations.contains_key(&reservation.id)
            || state.staged_reservations.contains_key(&reservation.id)
        {
            return Err(CoreError::Validation(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        self.lock_row(&mut state, reservation.id)?;
        state
            .staged_reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(&self, mut reservation: Reservation) -> CoreResult<Reservation> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        self.lock_row(&mut state, reservation.id)?;

        let Some(current) = self.current_version(&state, reservation.id) else {
            return Err(CoreError::NotFound {
                entity: "reservation",
                id: reservation.id.to_string(),
            });
        };
        if current != reservation.version {
            return Err(CoreError::VersionConflict {
                entity: "reservation",
                id: reservation.id.to_string(),
            });
        }

        reservation.version += 1;
        reservation.updated_at = Utc::now();
        state
            .staged_reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn conflict_for_update(&self, id: Uuid) -> CoreResult<Option<Conflict>> {
        let state = self.state();
        Self::ensure_open(&state)?;
        if let Some(staged) = state.staged_conflicts.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.shared.conflicts.get(&id).map(|c| c.clone()))
    }

    async fn insert_conflict(&self, conflict: Conflict) -> CoreResult<()> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state.staged_conflicts.insert(conflict.id, conflict);
        Ok(())
    }

    async fn update_conflict(&self, conflict: Conflict) -> CoreResult<()> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        if !self.shared.conflicts.contains_key(&conflict.id)
            && !state.staged_conflicts.contains_key(&conflict.id)
        {
            return Err(CoreError::NotFound {
                entity: "conflict",
                id: conflict.id.to_string(),
            });
        }
        state.staged_conflicts.insert(conflict.id, conflict);
        Ok(())
    }

    async fn append_audit(&self, audit: TransitionAudit) -> CoreResult<()> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state.staged_transition_audits.push(audit);
        Ok(())
    }

    async fn append_transaction_audit(&self, record: TransactionAuditRecord) -> CoreResult<()> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state.staged_transaction_audits.push(record);
        Ok(())
    }

    async fn commit(&self) -> CoreResult<()> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        for (id, reservation) in state.staged_reservations.drain() {
            self.shared.reservations.insert(id, reservation);
        }
        for (id, conflict) in state.staged_conflicts.drain() {
            self.shared.conflicts.insert(id, conflict);
        }
        if !state.staged_transition_audits.is_empty() {
            self.shared
                .transition_audits
                .lock()
                .expect("audit log poisoned")
                .append(&mut state.staged_transition_audits);
        }
        if !state.staged_transaction_audits.is_empty() {
            self.shared
                .transaction_audits
                .lock()
                .expect("audit log poisoned")
                .append(&mut state.staged_transaction_audits);
        }
        self.release_locks(&mut state);
        state.finished = true;
        Ok(())
    }

    async fn rollback(&self) -> CoreResult<()> {
        let mut state = self.state();
        Self::ensure_open(&state)?;
        state.staged_reservations.clear();
        state.staged_conflicts.clear();
        state.staged_transition_audits.clear();
        state.staged_transaction_audits.clear();
        self.release_locks(&mut state);
        state.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        // A dropped-without-finish unit of work must not leak row locks.
        let mut state = self.state.lock().expect("unit of work state poisoned");
        if !state.finished {
            self.release_locks(&mut state);
            state.finished = true;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
