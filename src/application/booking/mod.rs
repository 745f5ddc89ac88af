//! Reservation state machine and booking workflows

pub mod service;
pub mod state_machine;

pub use service::BookingService;
pub use state_machine::{actor_may_transition, apply_transition, is_legal_transition};
