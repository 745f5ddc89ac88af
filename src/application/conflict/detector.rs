//! Conflict detector
//!
//! Read-only classification of a shop's blocking reservations into
//! time-overlap, capacity and shared-resource conflicts. The detector
//! tolerates a slightly stale snapshot; the resolver re-validates inside a
//! fresh transaction before acting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Timelike};
use metrics::counter;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Conflict, ConflictKind, ConflictSeverity, CoreResult, Reservation,
};
use crate::infrastructure::storage::PersistenceGateway;

/// Default severity per conflict kind.
pub fn severity_of(kind: ConflictKind) -> ConflictSeverity {
    match kind {
        ConflictKind::TimeOverlap => ConflictSeverity::High,
        ConflictKind::CapacityExceeded => ConflictSeverity::High,
        ConflictKind::ResourceConflict => ConflictSeverity::Medium,
    }
}

/// Index pairs (i < j) sharing a staff id with intersecting windows.
pub fn overlap_pairs(rows: &[Reservation]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..rows.len() {
        for j in (i + 1)..rows.len() {
            if rows[i].shares_staff(&rows[j]) && rows[i].window.overlaps(&rows[j].window) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Index pairs (i < j) sharing a staff id whose windows abut without
/// overlapping (back-to-back on a shared physical resource).
pub fn abutting_pairs(rows: &[Reservation]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..rows.len() {
        for j in (i + 1)..rows.len() {
            if rows[i].shares_staff(&rows[j])
                && !rows[i].window.overlaps(&rows[j].window)
                && rows[i].window.abuts(&rows[j].window)
            {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// An overloaded group of reservations for one service
#[derive(Debug, Clone)]
pub struct CapacityGroup {
    pub service_id: String,
    pub reservation_ids: Vec<Uuid>,
    pub total_quantity: u32,
    pub capacity: u32,
}

/// Maximal overlap groups per service whose summed quantities exceed the
/// service's capacity.
///
/// For every window start among a service's reservations, the group is
/// every reservation of that service whose window covers the instant.
/// Groups with identical membership are emitted once. Services missing
/// from `capacities` are treated as uncapped.
pub fn capacity_groups(
    rows: &[Reservation],
    capacities: &HashMap<String, u32>,
) -> Vec<CapacityGroup> {
    let mut service_ids: Vec<&str> = rows
        .iter()
        .flat_map(|r| r.items.iter().map(|line| line.service_id.as_str()))
        .collect();
    service_ids.sort();
    service_ids.dedup();

    let mut groups = Vec::new();
    let mut seen: HashSet<(String, Vec<Uuid>)> = HashSet::new();

    for service_id in service_ids {
        let Some(&capacity) = capacities.get(service_id) else {
            continue;
        };
        let members: Vec<&Reservation> = rows
            .iter()
            .filter(|r| r.quantity_of(service_id) > 0)
            .collect();

        for anchor in &members {
            let instant_secs = anchor.window.start.num_seconds_from_midnight() as i64;

            let bucket: Vec<&&Reservation> = members
                .iter()
                .filter(|r| r.window.contains_instant(instant_secs))
                .collect();
            let total: u32 = bucket.iter().map(|r| r.quantity_of(service_id)).sum();
            if total <= capacity {
                continue;
            }

            let mut ids: Vec<Uuid> = bucket.iter().map(|r| r.id).collect();
            ids.sort();
            if seen.insert((service_id.to_string(), ids.clone())) {
                groups.push(CapacityGroup {
                    service_id: service_id.to_string(),
                    reservation_ids: ids,
                    total_quantity: total,
                    capacity,
                });
            }
        }
    }
    groups
}

/// Detects conflicts over the persistence gateway's snapshot reads.
pub struct ConflictDetector {
    gateway: Arc<dyn PersistenceGateway>,
}

impl ConflictDetector {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// Classify the blocking reservations of one shop and date.
    ///
    /// A storage read failure propagates; callers must not treat an error
    /// as "no conflicts". Never mutates a reservation.
    pub async fn detect(
        &self,
        shop_id: &str,
        date: NaiveDate,
        min_severity: ConflictSeverity,
    ) -> CoreResult<Vec<Conflict>> {
        let rows = self.gateway.blocking_reservations(shop_id, date).await?;

        let mut capacities: HashMap<String, u32> = HashMap::new();
        for row in &rows {
            for line in &row.items {
                if capacities.contains_key(&line.service_id) {
                    continue;
                }
                if let Some(service) = self.gateway.find_service(&line.service_id).await? {
                    capacities.insert(line.service_id.clone(), service.capacity);
                }
            }
        }

        let mut conflicts = Vec::new();

        for (i, j) in overlap_pairs(&rows) {
            let kind = ConflictKind::TimeOverlap;
            let mut conflict = Conflict::new(
                kind,
                severity_of(kind),
                vec![rows[i].id, rows[j].id],
                shop_id,
                date,
            );
            if let Some(staff) = &rows[i].staff_id {
                conflict = conflict.with_staff(staff.clone());
            }
            conflicts.push(conflict);
        }

        for group in capacity_groups(&rows, &capacities) {
            let kind = ConflictKind::CapacityExceeded;
            conflicts.push(
                Conflict::new(kind, severity_of(kind), group.reservation_ids, shop_id, date)
                    .with_service(group.service_id),
            );
        }

        for (i, j) in abutting_pairs(&rows) {
            let kind = ConflictKind::ResourceConflict;
            let mut conflict = Conflict::new(
                kind,
                severity_of(kind),
                vec![rows[i].id, rows[j].id],
                shop_id,
                date,
            );
            if let Some(staff) = &rows[i].staff_id {
                conflict = conflict.with_staff(staff.clone());
            }
            conflicts.push(conflict);
        }

        conflicts.retain(|c| c.severity >= min_severity);

        // Deterministic output order: kind, then earliest affected
        // reservation's creation time.
        let created_at: HashMap<Uuid, chrono::DateTime<chrono::Utc>> =
            rows.iter().map(|r| (r.id, r.created_at)).collect();
        conflicts.sort_by_key(|c| {
            let earliest = c
                .reservation_ids
                .iter()
                .filter_map(|id| created_at.get(id))
                .min()
                .copied();
            (kind_rank(c.kind), earliest, c.member_key())
        });

        if !conflicts.is_empty() {
            counter!("booking_conflicts_detected_total").increment(conflicts.len() as u64);
            debug!(
                shop_id = %shop_id,
                date = %date,
                count = conflicts.len(),
                "Conflicts detected"
            );
        }
        Ok(conflicts)
    }

    /// Detect over an inclusive date range.
    pub async fn detect_range(
        &self,
        shop_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        min_severity: ConflictSeverity,
    ) -> CoreResult<Vec<Conflict>> {
        let mut conflicts = Vec::new();
        let mut date = from;
        while date <= to {
            conflicts.extend(self.detect(shop_id, date, min_severity).await?);
            date = date.succ_opt().expect("date overflow");
        }
        Ok(conflicts)
    }
}

fn kind_rank(kind: ConflictKind) -> u8 {
    match kind {
        ConflictKind::TimeOverlap => 0,
        ConflictKind::CapacityExceeded => 1,
        ConflictKind::ResourceConflict => 2,
    }
}

// ── Tests ──────────────────────────────────────────────────────
