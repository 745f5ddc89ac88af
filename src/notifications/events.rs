//! Notification events
//!
//! Fire-and-forget events for the audit/notification sink. Delivery
//! failures never abort a committed transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event types emitted by the booking core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// The sweep (or a detection call) found a new conflict
    ConflictDetected(ConflictDetectedEvent),
    /// A conflict was resolved, automatically or manually
    ConflictResolved(ConflictResolvedEvent),
    /// A coordinator attempt was rolled back
    TransactionRolledBack(TransactionRolledBackEvent),
}

impl Event {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ConflictDetected(_) => "conflict_detected",
            Event::ConflictResolved(_) => "conflict_resolved",
            Event::TransactionRolledBack(_) => "transaction_rolled_back",
        }
    }

    /// Shop the event concerns, if any
    pub fn shop_id(&self) -> Option<&str> {
        match self {
            Event::ConflictDetected(e) => Some(&e.shop_id),
            Event::ConflictResolved(e) => Some(&e.shop_id),
            Event::TransactionRolledBack(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDetectedEvent {
    pub conflict_id: Uuid,
    pub shop_id: String,
    pub kind: String,
    pub severity: String,
    pub reservation_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolvedEvent {
    pub conflict_id: Uuid,
    pub shop_id: String,
    pub method: String,
    pub cancelled_reservation_ids: Vec<Uuid>,
    pub moved_reservation_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRolledBackEvent {
    pub transaction_id: Uuid,
    pub attempt: u32,
    pub reason: String,
}

/// Envelope broadcast to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names() {
        let e = Event::ConflictDetected(ConflictDetectedEvent {
            conflict_id: Uuid::new_v4(),
            shop_id: "shop-1".into(),
            kind: "time_overlap".into(),
            severity: "high".into(),
            reservation_ids: vec![],
        });
        assert_eq!(e.event_type(), "conflict_detected");
        assert_eq!(e.shop_id(), Some("shop-1"));

        let e = Event::TransactionRolledBack(TransactionRolledBackEvent {
            transaction_id: Uuid::new_v4(),
            attempt: 1,
            reason: "deadlock".into(),
        });
        assert_eq!(e.event_type(), "transaction_rolled_back");
        assert_eq!(e.shop_id(), None);
    }

    #[test]
    fn message_serializes_with_flattened_event() {
        let msg = EventMessage::new(Event::ConflictResolved(ConflictResolvedEvent {
            conflict_id: Uuid::new_v4(),
            shop_id: "shop-1".into(),
            method: "priority".into(),
            cancelled_reservation_ids: vec![Uuid::new_v4()],
            moved_reservation_ids: vec![],
        }));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ConflictResolved");
        assert!(json["data"]["conflict_id"].is_string());
    }
}
