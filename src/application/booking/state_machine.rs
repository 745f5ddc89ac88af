//! Reservation state machine
//!
//! Validates and applies status transitions for a single reservation.
//! Runs inside an open unit of work; a concurrent write surfaces as
//! `VersionConflict` to the caller (the coordinator treats it as
//! retryable) — the state machine itself never retries.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::application::transaction::context::TransactionContext;
use crate::domain::{
    Actor, ActorClass, CoreError, CoreResult, Reservation, ReservationStatus, TransitionAudit,
    TransitionReason,
};
use crate::infrastructure::storage::UnitOfWork;

/// The transition table. Any edge not listed here is illegal.
///
/// ```text
/// requested  -> confirmed | cancelled_by_user | cancelled_by_shop
/// confirmed  -> completed | cancelled_by_user | cancelled_by_shop | no_show
/// ```
pub fn is_legal_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (Requested, Confirmed)
            | (Requested, CancelledByUser)
            | (Requested, CancelledByShop)
            | (Confirmed, Completed)
            | (Confirmed, CancelledByUser)
            | (Confirmed, CancelledByShop)
            | (Confirmed, NoShow)
    )
}

/// Actor authorization per target status. Admin and System may drive every
/// legal edge; customers only cancel their own bookings, shops drive the
/// rest.
pub fn actor_may_transition(class: ActorClass, target: ReservationStatus) -> bool {
    use ReservationStatus::*;
    match target {
        Confirmed | Completed | CancelledByShop | NoShow => matches!(
            class,
            ActorClass::Shop | ActorClass::Admin | ActorClass::System
        ),
        CancelledByUser => matches!(
            class,
            ActorClass::User | ActorClass::Admin | ActorClass::System
        ),
        // No edge leads back into requested.
        Requested => false,
    }
}

/// Load the reservation, check edge legality and actor authorization,
/// write the new status and append exactly one immutable audit record.
///
/// On any failure nothing is mutated: staged writes die with the unit of
/// work's rollback and an illegal edge is rejected before any write is
/// staged.
pub async fn apply_transition(
    uow: &dyn UnitOfWork,
    ctx: &TransactionContext,
    reservation_id: Uuid,
    target: ReservationStatus,
    actor: &Actor,
    reason: TransitionReason,
) -> CoreResult<Reservation> {
    let reservation = uow
        .reservation_for_update(reservation_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "reservation",
            id: reservation_id.to_string(),
        })?;
    let from = reservation.status;

    if !is_legal_transition(from, target) {
        return Err(CoreError::InvalidTransition {
            from: from.as_str().into(),
            to: target.as_str().into(),
        });
    }
    if !actor_may_transition(actor.class, target) {
        return Err(CoreError::Unauthorized {
            actor: actor.to_string(),
            action: format!("transition {from} -> {target}"),
        });
    }

    let mut pending = reservation;
    pending.status = target;

    let write_token = ctx.record(
        "reservation",
        "update_status",
        json!({
            "reservation_id": reservation_id,
            "from": from.as_str(),
            "to": target.as_str(),
            "reason": reason.as_str(),
        }),
    );
    let updated = match uow.update_reservation(pending).await {
        Ok(updated) => {
            ctx.mark_executed(write_token);
            updated
        }
        Err(err) => {
            ctx.mark_failed(write_token);
            return Err(err);
        }
    };

    let audit_token = ctx.record(
        "reservation_audit",
        "append",
        json!({
            "reservation_id": reservation_id,
            "actor": actor.to_string(),
        }),
    );
    let audit = TransitionAudit::new(reservation_id, from, target, actor.clone(), reason);
    match uow.append_audit(audit).await {
        Ok(()) => ctx.mark_executed(audit_token),
        Err(err) => {
            ctx.mark_failed(audit_token);
            return Err(err);
        }
    }

    info!(
        reservation_id = %reservation_id,
        from = %from,
        to = %target,
        actor = %actor,
        "Reservation transition applied"
    );
    Ok(updated)
}

// ── Tests ──────────────────────────────────────────────────────
