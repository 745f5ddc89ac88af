//! Booking workflow service
//!
//! Entry point for incoming booking and cancellation requests: every
//! mutation runs through the transaction coordinator.

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::application::booking::state_machine::apply_transition;
use crate::application::transaction::{TransactionCoordinator, TransactionOptions};
use crate::domain::{
    Actor, CoreError, CoreResult, Reservation, ReservationStatus, TransitionReason,
};
use crate::infrastructure::storage::PersistenceGateway;

/// Service wrapping the state machine in coordinator transactions.
pub struct BookingService {
    coordinator: Arc<TransactionCoordinator>,
    gateway: Arc<dyn PersistenceGateway>,
    options: TransactionOptions,
}

impl BookingService {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            coordinator,
            gateway,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Accept a validated booking request.
    ///
    /// The staff double-booking guard re-checks the shop's blocking
    /// reservations inside the transaction; a slot taken since the
    /// upstream validation gate ran is rejected here.
    pub async fn request_reservation(&self, reservation: Reservation) -> CoreResult<Reservation> {
        if reservation.status != ReservationStatus::Requested {
            return Err(CoreError::Validation(
                "a new reservation must be in requested status".into(),
            ));
        }

        let gateway = self.gateway.clone();
        let created = self
            .coordinator
            .execute_in_transaction(&self.options, move |uow, ctx| {
                let gateway = gateway.clone();
                let candidate = reservation.clone();
                Box::pin(async move {
                    if candidate.staff_id.is_some() {
                        let existing = gateway
                            .blocking_reservations(&candidate.shop_id, candidate.date)
                            .await?;
                        let taken = existing.iter().any(|other| {
                            other.shares_staff(&candidate)
                                && other.window.overlaps(&candidate.window)
                        });
                        if taken {
                            return Err(CoreError::Validation(format!(
                                "staff {} is already booked in the requested window",
                                candidate.staff_id.as_deref().unwrap_or_default()
                            )));
                        }
                    }

                    let token = ctx.record(
                        "reservation",
                        "insert",
                        json!({
                            "reservation_id": candidate.id,
                            "shop_id": candidate.shop_id,
                        }),
                    );
                    match uow.insert_reservation(candidate).await {
                        Ok(created) => {
                            ctx.mark_executed(token);
                            Ok(created)
                        }
                        Err(err) => {
                            ctx.mark_failed(token);
                            Err(err)
                        }
                    }
                })
            })
            .await?;

        info!(
            reservation_id = %created.id,
            shop_id = %created.shop_id,
            "Reservation requested"
        );
        Ok(created)
    }

    /// Apply a status transition atomically (state change + audit record).
    pub async fn transition(
        &self,
        reservation_id: Uuid,
        target: ReservationStatus,
        actor: Actor,
        reason: TransitionReason,
    ) -> CoreResult<Reservation> {
        self.coordinator
            .execute_in_transaction(&self.options, move |uow, ctx| {
                let actor = actor.clone();
                let reason = reason.clone();
                Box::pin(async move {
                    apply_transition(uow.as_ref(), &ctx, reservation_id, target, &actor, reason)
                        .await
                })
            })
            .await
    }
}

// ── Tests ──────────────────────────────────────────────────────
