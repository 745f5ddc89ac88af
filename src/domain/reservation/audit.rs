//! Immutable transition audit records
//!
//! One record is appended per applied status transition. Records are
//! append-only; nothing in the crate updates or deletes them.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::reservation::model::ReservationStatus;

/// Authorization class of the actor driving a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorClass {
    User,
    Shop,
    Admin,
    System,
}

impl ActorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Shop => "shop",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ActorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who performed an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub class: ActorClass,
    pub id: String,
}

impl Actor {
    pub fn new(class: ActorClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }

    /// The platform itself (resolver, sweep, expiry tasks).
    pub fn system() -> Self {
        Self::new(ActorClass::System, "system")
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// Why a transition was applied.
///
/// The resolver passes these as opaque values; the state machine never
/// calls back into resolution logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionReason {
    CustomerRequest,
    ShopDecision,
    ConflictResolution,
    Expiry,
    ManualOverride { note: String },
    Other(String),
}

impl TransitionReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CustomerRequest => "customer_request",
            Self::ShopDecision => "shop_decision",
            Self::ConflictResolution => "conflict_resolution",
            Self::Expiry => "expiry",
            Self::ManualOverride { .. } => "manual_override",
            Self::Other(s) => s,
        }
    }
}

/// One applied transition
#[derive(Debug, Clone)]
pub struct TransitionAudit {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub actor: Actor,
    pub reason: TransitionReason,
    pub recorded_at: DateTime<Utc>,
}

impl TransitionAudit {
    pub fn new(
        reservation_id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        actor: Actor,
        reason: TransitionReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            from,
            to,
            actor,
            reason,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_captures_edge_and_actor() {
        let rid = Uuid::new_v4();
        let audit = TransitionAudit::new(
            rid,
            ReservationStatus::Requested,
            ReservationStatus::Confirmed,
            Actor::new(ActorClass::Shop, "shop-1"),
            TransitionReason::ShopDecision,
        );
        assert_eq!(audit.reservation_id, rid);
        assert_eq!(audit.from, ReservationStatus::Requested);
        assert_eq!(audit.to, ReservationStatus::Confirmed);
        assert_eq!(audit.actor.class, ActorClass::Shop);
    }

    #[test]
    fn manual_override_keeps_note() {
        let reason = TransitionReason::ManualOverride {
            note: "double booked, customer called".into(),
        };
        assert_eq!(reason.as_str(), "manual_override");
    }

    #[test]
    fn system_actor_shorthand() {
        let actor = Actor::system();
        assert_eq!(actor.class, ActorClass::System);
        assert_eq!(actor.to_string(), "system:system");
    }
}
