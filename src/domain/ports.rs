//! Collaborator ports
//!
//! Trait seams for services the booking core consumes but does not own.
//! The host wires real clients; tests wire fakes.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::reservation::TimeWindow;
use crate::domain::CoreResult;

/// An open slot suggested by the scheduling side of the platform
#[derive(Debug, Clone)]
pub struct SlotSuggestion {
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub staff_id: Option<String>,
}

/// Port to the time-slot service.
///
/// Consumed only by the resolver's alternative-slot strategy: before a
/// capacity-displaced reservation is cancelled, nearby open slots are
/// queried and offered instead.
#[async_trait]
pub trait TimeSlotService: Send + Sync {
    /// Find open slots near `excluded` for the given shop/service/date.
    /// Returns suggestions best-first; an empty list means no alternative.
    async fn find_alternative_slots(
        &self,
        shop_id: &str,
        service_id: &str,
        date: NaiveDate,
        excluded: TimeWindow,
    ) -> CoreResult<Vec<SlotSuggestion>>;
}
