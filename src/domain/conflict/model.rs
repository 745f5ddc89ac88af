//! Conflict domain entity
//!
//! Created by the detector (persisted by the sweep), mutated only by the
//! resolver or the admin override path.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::reservation::Actor;

/// What kind of contention was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Two reservations for the same staff member with intersecting windows
    TimeOverlap,
    /// Summed quantities in an overlap group exceed the service capacity
    CapacityExceeded,
    /// Same staff member, windows abut on a shared physical resource
    ResourceConflict,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeOverlap => "time_overlap",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::ResourceConflict => "resource_conflict",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity, ordered low to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a conflict was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionMethod {
    /// Higher customer tier or status weight won
    Priority,
    /// Earliest creation timestamp won
    FirstComeFirstServed,
    /// Displaced reservations were moved to alternative slots
    AlternativeSlot,
    /// Resolved by an authorized human actor
    Manual,
    /// Premise no longer held at resolution time; closed without action
    Revalidated,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::FirstComeFirstServed => "first_come_first_served",
            Self::AlternativeSlot => "alternative_slot",
            Self::Manual => "manual",
            Self::Revalidated => "revalidated",
        }
    }
}

/// Resolution stamp, set exactly once
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    pub method: ResolutionMethod,
    pub resolved_by: Actor,
    pub resolved_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Corrective action taken for a displaced reservation
#[derive(Debug, Clone)]
pub struct CompensationRecord {
    pub reservation_id: Uuid,
    pub description: String,
}

/// A detected contention between reservations
#[derive(Debug, Clone)]
pub struct Conflict {
    pub id: Uuid,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub reservation_ids: Vec<Uuid>,
    pub shop_id: String,
    pub date: NaiveDate,
    pub staff_id: Option<String>,
    pub service_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolution: Option<ConflictResolution>,
    pub compensation: Option<CompensationRecord>,
}

impl Conflict {
    pub fn new(
        kind: ConflictKind,
        severity: ConflictSeverity,
        reservation_ids: Vec<Uuid>,
        shop_id: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            reservation_ids,
            shop_id: shop_id.into(),
            date,
            staff_id: None,
            service_id: None,
            detected_at: Utc::now(),
            resolution: None,
            compensation: None,
        }
    }

    pub fn with_staff(mut self, staff_id: impl Into<String>) -> Self {
        self.staff_id = Some(staff_id.into());
        self
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Stamp the resolution. Panics in debug builds if stamped twice; the
    /// resolver guards against re-resolution before calling.
    pub fn stamp_resolved(&mut self, method: ResolutionMethod, actor: Actor, note: Option<String>) {
        debug_assert!(self.resolution.is_none(), "conflict resolved twice");
        self.resolution = Some(ConflictResolution {
            method,
            resolved_by: actor,
            resolved_at: Utc::now(),
            note,
        });
    }

    /// Affected reservation ids as a sorted set, for deduplication.
    pub fn member_key(&self) -> Vec<Uuid> {
        let mut ids = self.reservation_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }
}

// ── Tests ──────────────────────────────────────────────────────
