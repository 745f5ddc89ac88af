//! Conflict resolver
//!
//! Chooses and executes a resolution strategy per detected conflict.
//! Strategy order: manual hold (overrides) > priority (customer tier,
//! then status weight) > first-come-first-served > alternative slot
//! (capacity conflicts only, before any cancellation). Execution is
//! wrapped by the transaction coordinator so "cancel loser + stamp
//! conflict" is atomic; affected reservations are re-validated inside the
//! transaction before anything is touched.

use std::cmp::Reverse;
use std::sync::Arc;

use metrics::counter;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::application::booking::state_machine::apply_transition;
use crate::application::conflict::detector::{abutting_pairs, overlap_pairs};
use crate::application::conflict::overrides::OverrideStore;
use crate::application::transaction::{
    TransactionContext, TransactionCoordinator, TransactionOptions,
};
use crate::domain::{
    Actor, ActorClass, CompensationRecord, Conflict, ConflictKind, CoreError, CoreResult,
    CustomerTier, Reservation, ReservationStatus, ResolutionMethod, TimeSlotService,
    TransitionReason,
};
use crate::infrastructure::storage::{PersistenceGateway, UnitOfWork};
use crate::notifications::{ConflictResolvedEvent, Event, SharedEventBus};

/// Strict total order for resolution priority: customer tier, then status
/// weight (confirmed > requested), then earlier creation, then id bytes as
/// a deterministic final tiebreak. Greater key wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriorityKey {
    tier: u8,
    status: u8,
    recency: Reverse<i64>,
    id: Reverse<u128>,
}

pub fn priority_key(tier: CustomerTier, reservation: &Reservation) -> PriorityKey {
    PriorityKey {
        tier: tier.weight(),
        status: reservation.status.weight(),
        recency: Reverse(reservation.created_at.timestamp_micros()),
        id: Reverse(reservation.id.as_u128()),
    }
}

/// Which automatic method the ranking distinction implies: a tier or
/// status difference resolves by priority, a pure timestamp race is FCFS.
pub fn ranking_method(top: &PriorityKey, runner_up: &PriorityKey) -> ResolutionMethod {
    if top.tier != runner_up.tier || top.status != runner_up.status {
        ResolutionMethod::Priority
    } else {
        ResolutionMethod::FirstComeFirstServed
    }
}

/// Outcome of one resolution
#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub conflict_id: Uuid,
    pub shop_id: String,
    pub method: ResolutionMethod,
    pub kept: Vec<Uuid>,
    pub cancelled: Vec<Uuid>,
    pub moved: Vec<Uuid>,
}

/// Resolves conflicts atomically via the transaction coordinator.
pub struct ConflictResolver {
    gateway: Arc<dyn PersistenceGateway>,
    coordinator: Arc<TransactionCoordinator>,
    slots: Arc<dyn TimeSlotService>,
    overrides: Arc<OverrideStore>,
    bus: SharedEventBus,
    options: TransactionOptions,
}

impl ConflictResolver {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        coordinator: Arc<TransactionCoordinator>,
        slots: Arc<dyn TimeSlotService>,
        overrides: Arc<OverrideStore>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            gateway,
            coordinator,
            slots,
            overrides,
            bus,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Automatic resolution. `actor` must not be a customer; the sweep
    /// passes the system actor.
    pub async fn resolve(&self, conflict_id: Uuid, actor: Actor) -> CoreResult<ResolutionReport> {
        if actor.class == ActorClass::User {
            return Err(CoreError::Unauthorized {
                actor: actor.to_string(),
                action: "resolve conflicts".into(),
            });
        }

        let gateway = self.gateway.clone();
        let slots = self.slots.clone();
        let overrides = self.overrides.clone();
        let report = self
            .coordinator
            .execute_in_transaction(&self.options, move |uow, ctx| {
                let gateway = gateway.clone();
                let slots = slots.clone();
                let overrides = overrides.clone();
                let actor = actor.clone();
                Box::pin(resolve_in_tx(
                    uow, ctx, gateway, slots, overrides, conflict_id, actor,
                ))
            })
            .await?;

        self.publish(&report);
        counter!("booking_conflicts_resolved_total").increment(1);
        info!(
            conflict_id = %report.conflict_id,
            method = report.method.as_str(),
            cancelled = report.cancelled.len(),
            moved = report.moved.len(),
            "Conflict resolved"
        );
        Ok(report)
    }

    /// Admin override path. Requires an admin or shop actor and a textual
    /// reason for the audit trail; routed through the same coordinator as
    /// automatic resolution.
    pub async fn resolve_manual(
        &self,
        conflict_id: Uuid,
        winner_id: Uuid,
        loser_id: Uuid,
        reason: String,
        actor: Actor,
    ) -> CoreResult<ResolutionReport> {
        if reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "manual resolution requires a reason".into(),
            ));
        }
        if !matches!(actor.class, ActorClass::Admin | ActorClass::Shop) {
            return Err(CoreError::Unauthorized {
                actor: actor.to_string(),
                action: "manually resolve conflicts".into(),
            });
        }

        let report = self
            .coordinator
            .execute_in_transaction(&self.options, move |uow, ctx| {
                let reason = reason.clone();
                let actor = actor.clone();
                Box::pin(manual_in_tx(
                    uow, ctx, conflict_id, winner_id, loser_id, reason, actor,
                ))
            })
            .await?;

        self.publish(&report);
        counter!("booking_conflicts_resolved_total").increment(1);
        info!(
            conflict_id = %report.conflict_id,
            winner = %winner_id,
            "Conflict resolved manually"
        );
        Ok(report)
    }

    fn publish(&self, report: &ResolutionReport) {
        self.bus.publish(Event::ConflictResolved(ConflictResolvedEvent {
            conflict_id: report.conflict_id,
            shop_id: report.shop_id.clone(),
            method: report.method.as_str().to_string(),
            cancelled_reservation_ids: report.cancelled.clone(),
            moved_reservation_ids: report.moved.clone(),
        }));
    }
}

async fn resolve_in_tx(
    uow: Arc<dyn UnitOfWork>,
    ctx: Arc<TransactionContext>,
    gateway: Arc<dyn PersistenceGateway>,
    slots: Arc<dyn TimeSlotService>,
    overrides: Arc<OverrideStore>,
    conflict_id: Uuid,
    actor: Actor,
) -> CoreResult<ResolutionReport> {
    let conflict = uow
        .conflict_for_update(conflict_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "conflict",
            id: conflict_id.to_string(),
        })?;
    if conflict.is_resolved() {
        return Err(CoreError::Validation(format!(
            "conflict {conflict_id} is already resolved"
        )));
    }

    // Fresh, locked state of the affected reservations.
    let mut members: Vec<Reservation> = Vec::new();
    for id in conflict.member_key() {
        if let Some(r) = uow.reservation_for_update(id).await? {
            if r.is_blocking() {
                members.push(r);
            }
        }
    }

    if !premise_holds(&conflict, &members, &gateway).await? {
        let kept = members.iter().map(|r| r.id).collect();
        let report = ResolutionReport {
            conflict_id,
            shop_id: conflict.shop_id.clone(),
            method: ResolutionMethod::Revalidated,
            kept,
            cancelled: Vec::new(),
            moved: Vec::new(),
        };
        stamp_and_update(
            uow.as_ref(),
            &ctx,
            conflict,
            ResolutionMethod::Revalidated,
            actor,
            None,
        )
        .await?;
        return Ok(report);
    }

    // Overrides defer to the admin path before any automatic action.
    for member in &members {
        if let Some(kind) = overrides.hold_on(member) {
            return Err(CoreError::ResolutionDeferred {
                conflict_id,
                reason: format!("{} override on reservation {}", kind.as_str(), member.id),
            });
        }
    }

    // Rank by the strict total order, best first.
    let mut ranked: Vec<(PriorityKey, Reservation)> = Vec::with_capacity(members.len());
    for member in members {
        let tier = gateway.customer_tier(&member.user_id).await?;
        ranked.push((priority_key(tier, &member), member));
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    match conflict.kind {
        ConflictKind::CapacityExceeded => {
            resolve_capacity(uow, ctx, gateway, slots, conflict, ranked, actor).await
        }
        ConflictKind::TimeOverlap | ConflictKind::ResourceConflict => {
            resolve_by_rank(uow, ctx, conflict, ranked, actor).await
        }
    }
}

/// The detected premise is re-checked on fresh rows; a conflict whose
/// premise disappeared is closed without touching any reservation.
async fn premise_holds(
    conflict: &Conflict,
    members: &[Reservation],
    gateway: &Arc<dyn PersistenceGateway>,
) -> CoreResult<bool> {
    match conflict.kind {
        ConflictKind::TimeOverlap => {
            Ok(members.len() >= 2 && !overlap_pairs(members).is_empty())
        }
        ConflictKind::ResourceConflict => {
            Ok(members.len() >= 2 && !abutting_pairs(members).is_empty())
        }
        ConflictKind::CapacityExceeded => {
            let Some(service_id) = &conflict.service_id else {
                return Ok(false);
            };
            let Some(service) = gateway.find_service(service_id).await? else {
                return Ok(false);
            };
            let total: u32 = members.iter().map(|r| r.quantity_of(service_id)).sum();
            Ok(total > service.capacity)
        }
    }
}

/// Cancel everything below the winner. Used for time-overlap and
/// resource conflicts.
async fn resolve_by_rank(
    uow: Arc<dyn UnitOfWork>,
    ctx: Arc<TransactionContext>,
    conflict: Conflict,
    ranked: Vec<(PriorityKey, Reservation)>,
    actor: Actor,
) -> CoreResult<ResolutionReport> {
    let method = ranking_method(&ranked[0].0, &ranked[1].0);
    let winner = ranked[0].1.id;
    let mut cancelled = Vec::with_capacity(ranked.len() - 1);

    for (_, loser) in &ranked[1..] {
        apply_transition(
            uow.as_ref(),
            &ctx,
            loser.id,
            ReservationStatus::CancelledByShop,
            &actor,
            TransitionReason::ConflictResolution,
        )
        .await?;
        cancelled.push(loser.id);
    }

    let report = ResolutionReport {
        conflict_id: conflict.id,
        shop_id: conflict.shop_id.clone(),
        method: method.clone(),
        kept: vec![winner],
        cancelled,
        moved: Vec::new(),
    };
    stamp_and_update(uow.as_ref(), &ctx, conflict, method, actor, None).await?;
    Ok(report)
}

/// Displace the lowest-priority reservations until the bucket fits the
/// capacity: offer an alternative slot first, cancel only when none
/// exists. The highest-priority reservation is never displaced.
async fn resolve_capacity(
    uow: Arc<dyn UnitOfWork>,
    ctx: Arc<TransactionContext>,
    gateway: Arc<dyn PersistenceGateway>,
    slots: Arc<dyn TimeSlotService>,
    mut conflict: Conflict,
    ranked: Vec<(PriorityKey, Reservation)>,
    actor: Actor,
) -> CoreResult<ResolutionReport> {
    let service_id = conflict
        .service_id
        .clone()
        .ok_or_else(|| CoreError::ResolutionFailure {
            conflict_id: conflict.id,
            reason: "capacity conflict carries no service id".into(),
        })?;
    // premise_holds verified the service exists.
    let capacity = gateway
        .find_service(&service_id)
        .await?
        .map(|s| s.capacity)
        .unwrap_or(0);

    let mut total: u32 = ranked
        .iter()
        .map(|(_, r)| r.quantity_of(&service_id))
        .sum();
    let mut cancelled = Vec::new();
    let mut moved = Vec::new();

    for (_, reservation) in ranked[1..].iter().rev() {
        if total <= capacity {
            break;
        }
        let quantity = reservation.quantity_of(&service_id);

        let suggestions = slots
            .find_alternative_slots(
                &conflict.shop_id,
                &service_id,
                reservation.date,
                reservation.window,
            )
            .await?;

        if let Some(slot) = suggestions.first() {
            let mut rescheduled = reservation.clone();
            rescheduled.date = slot.date;
            rescheduled.window = slot.window;
            if let Some(staff) = &slot.staff_id {
                rescheduled.staff_id = Some(staff.clone());
            }

            let token = ctx.record(
                "reservation",
                "reschedule",
                json!({
                    "reservation_id": reservation.id,
                    "date": slot.date,
                    "start": slot.window.start.to_string(),
                }),
            );
            match uow.update_reservation(rescheduled).await {
                Ok(_) => ctx.mark_executed(token),
                Err(err) => {
                    ctx.mark_failed(token);
                    return Err(err);
                }
            }

            if conflict.compensation.is_none() {
                conflict.compensation = Some(CompensationRecord {
                    reservation_id: reservation.id,
                    description: format!(
                        "offered alternative slot {} {}",
                        slot.date, slot.window.start
                    ),
                });
            }
            moved.push(reservation.id);
        } else {
            apply_transition(
                uow.as_ref(),
                &ctx,
                reservation.id,
                ReservationStatus::CancelledByShop,
                &actor,
                TransitionReason::ConflictResolution,
            )
            .await?;
            cancelled.push(reservation.id);
        }

        total -= quantity;
    }

    if total > capacity {
        // Only the top reservation remains in the bucket and it alone
        // exceeds the capacity; a human has to decide.
        return Err(CoreError::ResolutionFailure {
            conflict_id: conflict.id,
            reason: "highest-priority reservation alone exceeds the service capacity".into(),
        });
    }

    let method = if !moved.is_empty() {
        ResolutionMethod::AlternativeSlot
    } else if ranked.len() >= 2 {
        ranking_method(&ranked[0].0, &ranked[1].0)
    } else {
        ResolutionMethod::FirstComeFirstServed
    };

    let kept: Vec<Uuid> = ranked
        .iter()
        .map(|(_, r)| r.id)
        .filter(|id| !cancelled.contains(id) && !moved.contains(id))
        .collect();

    let report = ResolutionReport {
        conflict_id: conflict.id,
        shop_id: conflict.shop_id.clone(),
        method: method.clone(),
        kept,
        cancelled,
        moved,
    };
    stamp_and_update(uow.as_ref(), &ctx, conflict, method, actor, None).await?;
    Ok(report)
}

async fn manual_in_tx(
    uow: Arc<dyn UnitOfWork>,
    ctx: Arc<TransactionContext>,
    conflict_id: Uuid,
    winner_id: Uuid,
    loser_id: Uuid,
    reason: String,
    actor: Actor,
) -> CoreResult<ResolutionReport> {
    let conflict = uow
        .conflict_for_update(conflict_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "conflict",
            id: conflict_id.to_string(),
        })?;
    if conflict.is_resolved() {
        return Err(CoreError::Validation(format!(
            "conflict {conflict_id} is already resolved"
        )));
    }

    let member_key = conflict.member_key();
    if winner_id == loser_id
        || !member_key.contains(&winner_id)
        || !member_key.contains(&loser_id)
    {
        return Err(CoreError::Validation(
            "winner and loser must be distinct members of the conflict".into(),
        ));
    }

    let loser = uow
        .reservation_for_update(loser_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "reservation",
            id: loser_id.to_string(),
        })?;

    let mut cancelled = Vec::new();
    if loser.is_blocking() {
        apply_transition(
            uow.as_ref(),
            &ctx,
            loser_id,
            ReservationStatus::CancelledByShop,
            &actor,
            TransitionReason::ManualOverride {
                note: reason.clone(),
            },
        )
        .await?;
        cancelled.push(loser_id);
    }

    let report = ResolutionReport {
        conflict_id,
        shop_id: conflict.shop_id.clone(),
        method: ResolutionMethod::Manual,
        kept: vec![winner_id],
        cancelled,
        moved: Vec::new(),
    };
    stamp_and_update(
        uow.as_ref(),
        &ctx,
        conflict,
        ResolutionMethod::Manual,
        actor,
        Some(reason),
    )
    .await?;
    Ok(report)
}

async fn stamp_and_update(
    uow: &dyn UnitOfWork,
    ctx: &TransactionContext,
    mut conflict: Conflict,
    method: ResolutionMethod,
    actor: Actor,
    note: Option<String>,
) -> CoreResult<()> {
    conflict.stamp_resolved(method.clone(), actor, note);
    let token = ctx.record(
        "conflict",
        "resolve",
        json!({
            "conflict_id": conflict.id,
            "method": method.as_str(),
        }),
    );
    match uow.update_conflict(conflict).await {
        Ok(()) => {
            ctx.mark_executed(token);
            Ok(())
        }
        Err(err) => {
            ctx.mark_failed(token);
            Err(err)
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
