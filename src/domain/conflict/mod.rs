//! Conflict entity and resolution records

pub mod model;

pub use model::{
    CompensationRecord, Conflict, ConflictKind, ConflictResolution, ConflictSeverity,
    ResolutionMethod,
};
