//! Reservation domain entity

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{CoreError, CoreResult};

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationStatus {
    /// Booking request accepted by the validation gate, awaiting shop confirmation
    Requested,
    /// Confirmed by the shop
    Confirmed,
    /// Service delivered
    Completed,
    /// Cancelled by the customer
    CancelledByUser,
    /// Cancelled by the shop (includes conflict resolution)
    CancelledByShop,
    /// Customer did not show up
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::CancelledByUser => "cancelled_by_user",
            Self::CancelledByShop => "cancelled_by_shop",
            Self::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(Self::Requested),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled_by_user" => Some(Self::CancelledByUser),
            "cancelled_by_shop" => Some(Self::CancelledByShop),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }

    /// Blocking statuses occupy capacity and can conflict with others.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Requested | Self::Confirmed)
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CancelledByUser | Self::CancelledByShop | Self::NoShow
        )
    }

    /// Status weight for priority resolution: confirmed outranks requested.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Confirmed => 2,
            Self::Requested => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One booked service line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLine {
    pub service_id: String,
    pub quantity: u32,
}

impl ServiceLine {
    pub fn new(service_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            service_id: service_id.into(),
            quantity,
        }
    }
}

/// Half-open time window `[start, start + duration)` within a single day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub duration: Duration,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, duration: Duration) -> Self {
        Self { start, duration }
    }

    fn start_secs(&self) -> i64 {
        self.start.num_seconds_from_midnight() as i64
    }

    fn end_secs(&self) -> i64 {
        self.start_secs() + self.duration.num_seconds()
    }

    /// Exclusive end of the window. Windows do not cross midnight.
    pub fn end(&self) -> NaiveTime {
        self.start + self.duration
    }

    /// Non-empty intersection of the two half-open intervals.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start_secs() < other.end_secs() && other.start_secs() < self.end_secs()
    }

    /// The windows touch without overlapping (end of one is start of the other).
    pub fn abuts(&self, other: &TimeWindow) -> bool {
        self.end_secs() == other.start_secs() || other.end_secs() == self.start_secs()
    }

    /// Whether the instant (seconds from midnight) falls inside the window.
    pub fn contains_instant(&self, secs: i64) -> bool {
        self.start_secs() <= secs && secs < self.end_secs()
    }
}

/// A customer's reservation of shop services in a time window.
///
/// Mutated exclusively through the state machine and the resolver, inside
/// an open unit of work. `version` is the optimistic-concurrency token.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub shop_id: String,
    pub user_id: String,
    pub items: Vec<ServiceLine>,
    pub staff_id: Option<String>,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub status: ReservationStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Build a new `requested` reservation, enforcing structural invariants.
    ///
    /// Business validation (shop hours, staff roster, payment holds) happens
    /// in the upstream validation gate; only shape is checked here.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shop_id: impl Into<String>,
        user_id: impl Into<String>,
        items: Vec<ServiceLine>,
        staff_id: Option<String>,
        date: NaiveDate,
        window: TimeWindow,
        total_amount: Decimal,
        currency: impl Into<String>,
    ) -> CoreResult<Self> {
        if items.is_empty() {
            return Err(CoreError::Validation(
                "reservation requires at least one service line".into(),
            ));
        }
        if items.iter().any(|line| line.quantity == 0) {
            return Err(CoreError::Validation(
                "service line quantity must be positive".into(),
            ));
        }
        if window.duration <= Duration::zero() {
            return Err(CoreError::Validation(
                "time window duration must be positive".into(),
            ));
        }
        if window.end_secs() > 24 * 3600 {
            return Err(CoreError::Validation(
                "time window must not cross midnight".into(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            shop_id: shop_id.into(),
            user_id: user_id.into(),
            items,
            staff_id,
            date,
            window,
            status: ReservationStatus::Requested,
            total_amount,
            currency: currency.into(),
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }

    /// Total quantity booked for a given service.
    pub fn quantity_of(&self, service_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|line| line.service_id == service_id)
            .map(|line| line.quantity)
            .sum()
    }

    /// Whether this reservation contends for the same staff member as `other`.
    pub fn shares_staff(&self, other: &Reservation) -> bool {
        match (&self.staff_id, &other.staff_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn sample() -> Reservation {
        Reservation::new(
            "shop-1",
            "user-1",
            vec![ServiceLine::new("cut", 1)],
            Some("staff-1".into()),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            TimeWindow::new(t(10, 0), Duration::minutes(75)),
            Decimal::new(3500, 2),
            "USD",
        )
        .unwrap()
    }

    #[test]
    fn new_reservation_is_requested_and_blocking() {
        let r = sample();
        assert_eq!(r.status, ReservationStatus::Requested);
        assert!(r.is_blocking());
        assert_eq!(r.version, 1);
    }

    #[test]
    fn empty_items_rejected() {
        let err = Reservation::new(
            "shop-1",
            "user-1",
            vec![],
            None,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            TimeWindow::new(t(10, 0), Duration::minutes(30)),
            Decimal::ZERO,
            "USD",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn zero_duration_rejected() {
        let err = Reservation::new(
            "shop-1",
            "user-1",
            vec![ServiceLine::new("cut", 1)],
            None,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            TimeWindow::new(t(10, 0), Duration::zero()),
            Decimal::ZERO,
            "USD",
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn windows_overlap_half_open() {
        let a = TimeWindow::new(t(10, 0), Duration::minutes(75)); // 10:00-11:15
        let b = TimeWindow::new(t(10, 30), Duration::minutes(75)); // 10:30-11:45
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn adjacent_windows_abut_but_do_not_overlap() {
        let a = TimeWindow::new(t(10, 0), Duration::minutes(60)); // 10:00-11:00
        let b = TimeWindow::new(t(11, 0), Duration::minutes(60)); // 11:00-12:00
        assert!(!a.overlaps(&b));
        assert!(a.abuts(&b));
        assert!(b.abuts(&a));
    }

    #[test]
    fn disjoint_windows_neither_overlap_nor_abut() {
        let a = TimeWindow::new(t(9, 0), Duration::minutes(30));
        let b = TimeWindow::new(t(12, 0), Duration::minutes(30));
        assert!(!a.overlaps(&b));
        assert!(!a.abuts(&b));
    }

    #[test]
    fn status_roundtrip_and_classification() {
        for status in &[
            ReservationStatus::Requested,
            ReservationStatus::Confirmed,
            ReservationStatus::Completed,
            ReservationStatus::CancelledByUser,
            ReservationStatus::CancelledByShop,
            ReservationStatus::NoShow,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Some(*status));
            assert_ne!(status.is_blocking(), status.is_terminal());
        }
        assert_eq!(ReservationStatus::parse("unknown"), None);
    }

    #[test]
    fn status_weight_ranks_confirmed_over_requested() {
        assert!(ReservationStatus::Confirmed.weight() > ReservationStatus::Requested.weight());
        assert_eq!(ReservationStatus::Completed.weight(), 0);
    }

    #[test]
    fn quantity_of_sums_matching_lines() {
        let mut r = sample();
        r.items.push(ServiceLine::new("cut", 2));
        r.items.push(ServiceLine::new("color", 1));
        assert_eq!(r.quantity_of("cut"), 3);
        assert_eq!(r.quantity_of("color"), 1);
        assert_eq!(r.quantity_of("massage"), 0);
    }

    #[test]
    fn shares_staff_requires_both_assigned() {
        let a = sample();
        let mut b = sample();
        assert!(a.shares_staff(&b));
        b.staff_id = None;
        assert!(!a.shares_staff(&b));
    }
}
