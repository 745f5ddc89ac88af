//! # Booking Core
//!
//! Booking core of a multi-tenant service-reservation platform:
//! guarantees that concurrent reservation requests against a shared
//! shop/staff/time-slot resource never double-book, that conflicting
//! reservations are detected and resolved deterministically, and that
//! multi-step booking workflows commit atomically or not at all.
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **domain**: Core business entities, types and collaborator ports
//! - **application**: Reservation state machine, conflict detector and
//!   resolver, transaction coordinator with deadlock detection and
//!   distributed (compensating) transactions
//! - **infrastructure**: Persistence gateway boundary and the in-memory
//!   implementation
//! - **notifications**: Fire-and-forget events for the audit sink
//! - **shared**: Shutdown signal for background tasks

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod notifications;
pub mod shared;

pub use config::{CoreConfig, OverrideConfig, TransactionConfig};

// Re-export the engine types for easy access
pub use application::booking::BookingService;
pub use application::conflict::{
    ConflictDetector, ConflictResolver, ConflictSweep, OverrideKind, OverrideStore, SweepConfig,
};
pub use application::transaction::{
    execute_distributed_transaction, Collaborator, CollaboratorRequest, DeadlockDetector,
    DistributedStep, TransactionContext, TransactionCoordinator, TransactionOptions,
};
pub use domain::{CoreError, CoreResult};
pub use infrastructure::{InMemoryGateway, IsolationLevel, PersistenceGateway, UnitOfWork};

// Re-export notifications
pub use notifications::{create_event_bus, Event, EventBus, SharedEventBus};
