//! Reservation entity, status machine data and audit records

pub mod audit;
pub mod model;

pub use audit::{Actor, ActorClass, TransitionAudit, TransitionReason};
pub use model::{Reservation, ReservationStatus, ServiceLine, TimeWindow};
