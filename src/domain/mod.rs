//! Core business entities, value types and collaborator ports

pub mod catalog;
pub mod conflict;
pub mod customer;
pub mod error;
pub mod ports;
pub mod reservation;

pub use catalog::ServiceOffering;
pub use conflict::{
    CompensationRecord, Conflict, ConflictKind, ConflictResolution, ConflictSeverity,
    ResolutionMethod,
};
pub use customer::CustomerTier;
pub use error::{CoreError, CoreResult};
pub use ports::{SlotSuggestion, TimeSlotService};
pub use reservation::{
    Actor, ActorClass, Reservation, ReservationStatus, ServiceLine, TimeWindow, TransitionAudit,
    TransitionReason,
};
