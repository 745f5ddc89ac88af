//! Conflict detection, resolution, overrides and the scheduled sweep

pub mod detector;
pub mod overrides;
pub mod resolver;
pub mod sweep;

pub use detector::{
    abutting_pairs, capacity_groups, overlap_pairs, severity_of, CapacityGroup, ConflictDetector,
};
pub use overrides::{OverrideKind, OverrideStore};
pub use resolver::{priority_key, ranking_method, ConflictResolver, PriorityKey, ResolutionReport};
pub use sweep::{ConflictSweep, SweepConfig, SweepStats};
