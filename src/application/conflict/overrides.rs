//! Override store for conflict resolution
//!
//! Explicit, injected replacement for ambient whitelist/blacklist maps:
//! users or reservations flagged here are excluded from automatic
//! resolution and routed to the admin override path. Entries carry an
//! optional TTL; expired entries are purged on read and by
//! `purge_expired`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::Reservation;

/// Why an entry defers automatic resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    /// Protected customer: never auto-cancel, a human decides
    Whitelist,
    /// Flagged customer: automatic outcomes are not trusted
    Blacklist,
    /// An admin has claimed the case
    ManualHold,
}

impl OverrideKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
            Self::ManualHold => "manual_hold",
        }
    }
}

#[derive(Debug, Clone)]
struct OverrideEntry {
    kind: OverrideKind,
    expires_at: Option<DateTime<Utc>>,
}

impl OverrideEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Injected cache of resolution overrides.
pub struct OverrideStore {
    users: DashMap<String, OverrideEntry>,
    reservations: DashMap<Uuid, OverrideEntry>,
    default_ttl: Option<Duration>,
}

impl OverrideStore {
    /// `default_ttl` bounds the lifetime of entries flagged without an
    /// explicit TTL; `None` keeps them until cleared.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            users: DashMap::new(),
            reservations: DashMap::new(),
            default_ttl,
        }
    }

    pub fn flag_user(&self, user_id: impl Into<String>, kind: OverrideKind) {
        self.flag_user_for(user_id, kind, self.default_ttl);
    }

    pub fn flag_user_for(
        &self,
        user_id: impl Into<String>,
        kind: OverrideKind,
        ttl: Option<Duration>,
    ) {
        self.users.insert(
            user_id.into(),
            OverrideEntry {
                kind,
                expires_at: ttl.map(|ttl| Utc::now() + ttl),
            },
        );
    }

    pub fn flag_reservation(&self, reservation_id: Uuid, kind: OverrideKind) {
        self.reservations.insert(
            reservation_id,
            OverrideEntry {
                kind,
                expires_at: self.default_ttl.map(|ttl| Utc::now() + ttl),
            },
        );
    }

    pub fn clear_user(&self, user_id: &str) {
        self.users.remove(user_id);
    }

    pub fn clear_reservation(&self, reservation_id: Uuid) {
        self.reservations.remove(&reservation_id);
    }

    /// Active override kind for a reservation, checking both the
    /// reservation itself and its owner. Expired entries are dropped.
    pub fn hold_on(&self, reservation: &Reservation) -> Option<OverrideKind> {
        let now = Utc::now();

        if let Some(entry) = self.reservations.get(&reservation.id) {
            if entry.expired(now) {
                drop(entry);
                self.reservations.remove(&reservation.id);
            } else {
                return Some(entry.kind);
            }
        }

        if let Some(entry) = self.users.get(&reservation.user_id) {
            if entry.expired(now) {
                drop(entry);
                self.users.remove(&reservation.user_id);
            } else {
                return Some(entry.kind);
            }
        }
        None
    }

    pub fn is_held(&self, reservation: &Reservation) -> bool {
        self.hold_on(reservation).is_some()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.users.retain(|_, entry| !entry.expired(now));
        self.reservations.retain(|_, entry| !entry.expired(now));
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ──────────────────────────────────────────────────────
