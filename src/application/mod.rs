//! Business logic: booking workflows, conflict engine, transaction
//! coordination

pub mod booking;
pub mod conflict;
pub mod transaction;

pub use booking::BookingService;
pub use conflict::{ConflictDetector, ConflictResolver, ConflictSweep, OverrideStore};
pub use transaction::{TransactionCoordinator, TransactionOptions};
