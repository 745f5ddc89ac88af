//! Persistence gateway boundary

pub mod gateway;
pub mod memory;

pub use gateway::{IsolationLevel, PersistenceGateway, UnitOfWork};
pub use memory::InMemoryGateway;
