//! Fire-and-forget events for the notification/audit sink

pub mod event_bus;
pub mod events;

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};
pub use events::{
    ConflictDetectedEvent, ConflictResolvedEvent, Event, EventMessage, TransactionRolledBackEvent,
};
