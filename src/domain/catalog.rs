//! Service catalog entities
//!
//! Read-only for this core; the catalog is owned by the shop-management
//! side of the platform.

use chrono::Duration;
use rust_decimal::Decimal;

/// A bookable service offered by a shop
#[derive(Debug, Clone)]
pub struct ServiceOffering {
    pub service_id: String,
    pub shop_id: String,
    pub name: String,
    /// Maximum summed quantity across overlapping reservations
    pub capacity: u32,
    pub default_duration: Duration,
    pub price: Decimal,
}

impl ServiceOffering {
    pub fn new(
        service_id: impl Into<String>,
        shop_id: impl Into<String>,
        name: impl Into<String>,
        capacity: u32,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            shop_id: shop_id.into(),
            name: name.into(),
            capacity,
            default_duration: Duration::minutes(60),
            price: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offering_defaults() {
        let s = ServiceOffering::new("cut", "shop-1", "Haircut", 2);
        assert_eq!(s.capacity, 2);
        assert_eq!(s.default_duration, Duration::minutes(60));
    }
}
