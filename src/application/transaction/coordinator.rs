//! Transaction coordinator
//!
//! Wraps booking workflows in an atomic unit of work with retry,
//! rollback and deadlock-aware failure classification. Transient storage
//! failures (deadlock, timeout, serialization conflict, version conflict)
//! are recovered with exponential backoff; everything else rolls back and
//! propagates to the caller.

use std::cmp;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use metrics::counter;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::transaction::context::{
    ContextOutcome, TransactionAuditRecord, TransactionContext,
};
use crate::application::transaction::deadlock::{DeadlockDetector, ResourceKey};
use crate::domain::{CoreError, CoreResult};
use crate::infrastructure::storage::{IsolationLevel, PersistenceGateway, UnitOfWork};
use crate::notifications::{Event, SharedEventBus, TransactionRolledBackEvent};

/// Cap on the exponential backoff between retries
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Options for one coordinator invocation
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    pub retry_delay_base: Duration,
    /// Wall-clock budget for the whole invocation, retries included
    pub timeout: Duration,
    /// Emit a transaction audit record per invocation
    pub enable_logging: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            max_retries: 3,
            retry_delay_base: Duration::from_millis(50),
            timeout: Duration::from_secs(30),
            enable_logging: true,
        }
    }
}

/// Exponential backoff with cap: `base * 2^(attempt-1)`, never above `cap`.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    cmp::min(base.saturating_mul(factor), cap)
}

fn remaining_budget(timeout: Duration, started: Instant) -> Option<Duration> {
    timeout
        .checked_sub(started.elapsed())
        .filter(|d| !d.is_zero())
}

/// Coordinates atomic units of work over the persistence gateway.
pub struct TransactionCoordinator {
    gateway: Arc<dyn PersistenceGateway>,
    deadlock: Arc<DeadlockDetector>,
    bus: SharedEventBus,
}

impl TransactionCoordinator {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, bus: SharedEventBus) -> Self {
        Self {
            gateway,
            deadlock: Arc::new(DeadlockDetector::new()),
            bus,
        }
    }

    /// Share a deadlock detector with the gateway implementation so that
    /// storage-level waits and coordinator bookkeeping see one graph.
    pub fn with_deadlock_detector(mut self, detector: Arc<DeadlockDetector>) -> Self {
        self.deadlock = detector;
        self
    }

    pub fn deadlock_detector(&self) -> &Arc<DeadlockDetector> {
        &self.deadlock
    }

    /// Register a wait edge for `tx_id` on the given resource and run
    /// cycle detection. A cycle raises `DeadlockDetected`, which this
    /// coordinator classifies as retryable.
    pub fn detect_deadlock(
        &self,
        tx_id: Uuid,
        resource_kind: &'static str,
        resource_id: &str,
    ) -> CoreResult<()> {
        self.deadlock
            .check_wait(tx_id, ResourceKey::new(resource_kind, resource_id))
    }

    /// Execute `operation` inside an atomic unit of work.
    ///
    /// The operation may run up to `max_retries + 1` times; it must be
    /// idempotent up to its staged writes, which are discarded on every
    /// rollback. The sub-operations it records on the context must all be
    /// marked executed before the commit is allowed through.
    pub async fn execute_in_transaction<T, F>(
        &self,
        options: &TransactionOptions,
        mut operation: F,
    ) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnMut(Arc<dyn UnitOfWork>, Arc<TransactionContext>) -> BoxFuture<'static, CoreResult<T>>
            + Send,
    {
        let ctx = Arc::new(TransactionContext::new(options.isolation));
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            ctx.begin_attempt(attempt - 1);

            let uow = self.gateway.begin(options.isolation).await?;

            let Some(remaining) = remaining_budget(options.timeout, started) else {
                let _ = uow.rollback().await;
                return Err(self.finish_timeout(&ctx, started, attempt, options).await);
            };

            let error = match tokio::time::timeout(remaining, operation(uow.clone(), ctx.clone()))
                .await
            {
                Err(_) => {
                    // Budget expired mid-operation: the in-flight work is
                    // not force-killed, its outcome is discarded with the
                    // rollback.
                    let _ = uow.rollback().await;
                    return Err(self.finish_timeout(&ctx, started, attempt, options).await);
                }
                Ok(Ok(value)) => {
                    if !ctx.all_executed() {
                        let _ = uow.rollback().await;
                        self.deadlock.release(ctx.id());
                        ctx.set_outcome(ContextOutcome::Aborted);
                        self.publish_rollback(&ctx, attempt, "context incomplete");
                        self.write_audit(&ctx, ContextOutcome::Aborted, options).await;
                        return Err(CoreError::ContextIncomplete {
                            transaction_id: ctx.id(),
                        });
                    }
                    match uow.commit().await {
                        Ok(()) => {
                            self.deadlock.release(ctx.id());
                            ctx.set_outcome(ContextOutcome::Committed);
                            counter!("booking_transactions_committed_total").increment(1);
                            if attempt > 1 {
                                info!(
                                    transaction_id = %ctx.id(),
                                    attempt,
                                    "Transaction committed after retry"
                                );
                            } else {
                                debug!(transaction_id = %ctx.id(), "Transaction committed");
                            }
                            self.write_audit(&ctx, ContextOutcome::Committed, options).await;
                            return Ok(value);
                        }
                        Err(err) => {
                            let _ = uow.rollback().await;
                            err
                        }
                    }
                }
                Ok(Err(err)) => {
                    let _ = uow.rollback().await;
                    err
                }
            };

            self.deadlock.release(ctx.id());
            counter!("booking_transactions_rolled_back_total").increment(1);
            self.publish_rollback(&ctx, attempt, &error.to_string());

            if error.is_retryable() && attempt <= options.max_retries {
                counter!("booking_transaction_retries_total").increment(1);
                let delay = backoff_delay(options.retry_delay_base, attempt, MAX_BACKOFF);
                warn!(
                    transaction_id = %ctx.id(),
                    attempt,
                    max_retries = options.max_retries,
                    error = %error,
                    retry_in_ms = delay.as_millis() as u64,
                    "Transient transaction failure, retrying"
                );
                let capped = remaining_budget(options.timeout, started)
                    .map(|rest| cmp::min(delay, rest))
                    .unwrap_or(Duration::ZERO);
                tokio::time::sleep(capped).await;
                continue;
            }

            ctx.set_outcome(ContextOutcome::RolledBack);
            self.write_audit(&ctx, ContextOutcome::RolledBack, options).await;
            warn!(
                transaction_id = %ctx.id(),
                attempt,
                error = %error,
                "Transaction rolled back"
            );
            return Err(error);
        }
    }

    async fn finish_timeout(
        &self,
        ctx: &TransactionContext,
        started: Instant,
        attempt: u32,
        options: &TransactionOptions,
    ) -> CoreError {
        self.deadlock.release(ctx.id());
        ctx.set_outcome(ContextOutcome::RolledBack);
        counter!("booking_transactions_rolled_back_total").increment(1);
        self.publish_rollback(ctx, attempt, "transaction timeout");
        self.write_audit(ctx, ContextOutcome::RolledBack, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        warn!(transaction_id = %ctx.id(), attempt, elapsed_ms, "Transaction timed out");
        CoreError::TransactionTimeout { elapsed_ms }
    }

    fn publish_rollback(&self, ctx: &TransactionContext, attempt: u32, reason: &str) {
        self.bus.publish(Event::TransactionRolledBack(
            TransactionRolledBackEvent {
                transaction_id: ctx.id(),
                attempt,
                reason: reason.to_string(),
            },
        ));
    }

    /// Best-effort audit of the invocation's sub-operations and outcome.
    /// A failed audit write is reported, never fatal.
    async fn write_audit(
        &self,
        ctx: &TransactionContext,
        outcome: ContextOutcome,
        options: &TransactionOptions,
    ) {
        if !options.enable_logging {
            return;
        }
        let record = TransactionAuditRecord::from_context(ctx, outcome);
        let result = async {
            let uow = self.gateway.begin(IsolationLevel::ReadCommitted).await?;
            uow.append_transaction_audit(record).await?;
            uow.commit().await
        }
        .await;
        if let Err(err) = result {
            warn!(
                transaction_id = %ctx.id(),
                error = %err,
                "Transaction audit write failed"
            );
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Reservation, ReservationStatus, ServiceLine, TimeWindow};
    use crate::infrastructure::storage::InMemoryGateway;
    use crate::notifications::create_event_bus;
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(max_retries: u32) -> TransactionOptions {
        TransactionOptions {
            max_retries,
            retry_delay_base: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn coordinator() -> (Arc<InMemoryGateway>, TransactionCoordinator) {
        let gateway = Arc::new(InMemoryGateway::new());
        let coordinator = TransactionCoordinator::new(gateway.clone(), create_event_bus());
        (gateway, coordinator)
    }

    fn sample_reservation() -> Reservation {
        Reservation::new(
            "shop-1",
            "user-1",
            vec![ServiceLine::new("cut", 1)],
            Some("staff-1".into()),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            TimeWindow::new(
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                chrono::Duration::minutes(60),
            ),
            Decimal::new(2000, 2),
            "USD",
        )
        .unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 1, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3, cap), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 10, cap), cap);
    }

    #[tokio::test]
    async fn retryable_error_runs_max_retries_plus_one_times() {
        let (_, coordinator) = coordinator();
        let calls = Arc::new(AtomicU32::new(0));

        let counted = calls.clone();
        let result: CoreResult<()> = coordinator
            .execute_in_transaction(&fast_options(3), move |_uow, _ctx| {
                let counted = counted.clone();
                Box::pin(async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::SerializationFailure("write skew".into()))
                })
            })
            .await;

        assert!(matches!(result, Err(CoreError::SerializationFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_runs_exactly_once() {
        let (_, coordinator) = coordinator();
        let calls = Arc::new(AtomicU32::new(0));

        let counted = calls.clone();
        let result: CoreResult<()> = coordinator
            .execute_in_transaction(&fast_options(5), move |_uow, _ctx| {
                let counted = counted.clone();
                Box::pin(async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::Validation("business rule".into()))
                })
            })
            .await;

        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_then_success_commits() {
        let (gateway, coordinator) = coordinator();
        let reservation = sample_reservation();
        let id = reservation.id;
        gateway.seed_reservation(reservation);

        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let updated = coordinator
            .execute_in_transaction(&fast_options(3), move |uow, ctx| {
                let counted = counted.clone();
                Box::pin(async move {
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(CoreError::VersionConflict {
                            entity: "reservation",
                            id: id.to_string(),
                        });
                    }
                    let mut r = uow
                        .reservation_for_update(id)
                        .await?
                        .ok_or(CoreError::NotFound {
                            entity: "reservation",
                            id: id.to_string(),
                        })?;
                    r.status = ReservationStatus::Confirmed;
                    let token = ctx.record("reservation", "update_status", json!({"id": id}));
                    let r = uow.update_reservation(r).await?;
                    ctx.mark_executed(token);
                    Ok(r)
                })
            })
            .await
            .unwrap();

        assert_eq!(updated.status, ReservationStatus::Confirmed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let committed = gateway.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(committed.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn failed_attempt_leaves_no_partial_state() {
        let (gateway, coordinator) = coordinator();
        let reservation = sample_reservation();
        let id = reservation.id;
        gateway.seed_reservation(reservation);

        let result: CoreResult<()> = coordinator
            .execute_in_transaction(&fast_options(0), move |uow, ctx| {
                Box::pin(async move {
                    let mut r = uow.reservation_for_update(id).await?.unwrap();
                    r.status = ReservationStatus::Confirmed;
                    let token = ctx.record("reservation", "update_status", json!({"id": id}));
                    uow.update_reservation(r).await?;
                    ctx.mark_executed(token);
                    Err(CoreError::Validation("late business-rule failure".into()))
                })
            })
            .await;

        assert!(result.is_err());
        let committed = gateway.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(committed.status, ReservationStatus::Requested);
        assert_eq!(committed.version, 1);
    }

    #[tokio::test]
    async fn unexecuted_sub_operation_blocks_commit() {
        let (gateway, coordinator) = coordinator();
        let reservation = sample_reservation();
        let id = reservation.id;
        gateway.seed_reservation(reservation);

        let result: CoreResult<()> = coordinator
            .execute_in_transaction(&fast_options(2), move |uow, ctx| {
                Box::pin(async move {
                    let mut r = uow.reservation_for_update(id).await?.unwrap();
                    r.status = ReservationStatus::Confirmed;
                    ctx.record("reservation", "update_status", json!({"id": id}));
                    uow.update_reservation(r).await?;
                    // Never marked executed.
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(CoreError::ContextIncomplete { .. })));
        let committed = gateway.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(committed.status, ReservationStatus::Requested);
    }

    #[tokio::test]
    async fn wall_clock_timeout_rolls_back() {
        let (gateway, coordinator) = coordinator();
        let reservation = sample_reservation();
        let id = reservation.id;
        gateway.seed_reservation(reservation);

        let options = TransactionOptions {
            timeout: Duration::from_millis(20),
            ..fast_options(3)
        };
        let result: CoreResult<()> = coordinator
            .execute_in_transaction(&options, move |uow, _ctx| {
                Box::pin(async move {
                    let mut r = uow.reservation_for_update(id).await?.unwrap();
                    r.status = ReservationStatus::Confirmed;
                    uow.update_reservation(r).await?;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(CoreError::TransactionTimeout { .. })));
        let committed = gateway.find_reservation(id).await.unwrap().unwrap();
        assert_eq!(committed.status, ReservationStatus::Requested);
    }

    #[tokio::test]
    async fn rollback_publishes_event() {
        let gateway = Arc::new(InMemoryGateway::new());
        let bus = create_event_bus();
        let coordinator = TransactionCoordinator::new(gateway, bus.clone());
        let mut subscriber = bus.subscribe();

        let result: CoreResult<()> = coordinator
            .execute_in_transaction(&fast_options(0), |_uow, _ctx| {
                Box::pin(async { Err(CoreError::Validation("no".into())) })
            })
            .await;
        assert!(result.is_err());

        let message = tokio::time::timeout(Duration::from_millis(100), subscriber.recv())
            .await
            .expect("timeout")
            .expect("no message");
        assert_eq!(message.event.event_type(), "transaction_rolled_back");
    }

    #[tokio::test]
    async fn committed_invocation_writes_audit_record() {
        let (gateway, coordinator) = coordinator();

        coordinator
            .execute_in_transaction(&fast_options(0), |_uow, ctx| {
                Box::pin(async move {
                    let token = ctx.record("noop", "noop", json!({}));
                    ctx.mark_executed(token);
                    Ok(())
                })
            })
            .await
            .unwrap();

        let audits = gateway.transaction_audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].outcome, ContextOutcome::Committed);
        assert_eq!(audits[0].operations.len(), 1);
    }

    #[tokio::test]
    async fn logging_disabled_skips_audit_record() {
        let (gateway, coordinator) = coordinator();
        let options = TransactionOptions {
            enable_logging: false,
            ..fast_options(0)
        };

        coordinator
            .execute_in_transaction(&options, |_uow, _ctx| Box::pin(async { Ok(()) }))
            .await
            .unwrap();

        assert!(gateway.transaction_audits().is_empty());
    }
}
