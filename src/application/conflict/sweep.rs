//! Scheduled conflict sweep
//!
//! Background task that periodically scans every active shop's open date
//! range, persists newly detected conflicts, publishes
//! `conflict_detected` events and (when enabled) hands each open conflict
//! to the resolver. Runs in a tokio::spawn loop until shutdown.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::conflict::detector::ConflictDetector;
use crate::application::conflict::resolver::ConflictResolver;
use crate::application::transaction::{TransactionCoordinator, TransactionOptions};
use crate::domain::{Actor, Conflict, ConflictKind, ConflictSeverity, CoreError, CoreResult};
use crate::infrastructure::storage::PersistenceGateway;
use crate::notifications::{ConflictDetectedEvent, Event, SharedEventBus};
use crate::shared::shutdown::ShutdownSignal;

/// Sweep configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweep rounds
    pub interval_secs: u64,
    /// Days ahead of today to scan, inclusive of today
    pub horizon_days: u32,
    /// Hand open conflicts to the resolver after persisting
    pub auto_resolve: bool,
    /// Minimum severity to report
    pub min_severity: ConflictSeverity,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            horizon_days: 7,
            auto_resolve: true,
            min_severity: ConflictSeverity::Low,
        }
    }
}

/// Counters from one sweep round
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub shops: usize,
    pub detected: usize,
    pub persisted: usize,
    pub resolved: usize,
    pub deferred: usize,
}

/// Periodic detect-persist-resolve sweep over all active shops.
pub struct ConflictSweep {
    detector: Arc<ConflictDetector>,
    resolver: Arc<ConflictResolver>,
    coordinator: Arc<TransactionCoordinator>,
    gateway: Arc<dyn PersistenceGateway>,
    bus: SharedEventBus,
    config: SweepConfig,
}

impl ConflictSweep {
    pub fn new(
        detector: Arc<ConflictDetector>,
        resolver: Arc<ConflictResolver>,
        coordinator: Arc<TransactionCoordinator>,
        gateway: Arc<dyn PersistenceGateway>,
        bus: SharedEventBus,
        config: SweepConfig,
    ) -> Self {
        Self {
            detector,
            resolver,
            coordinator,
            gateway,
            bus,
            config,
        }
    }

    /// One sweep round over `[today, today + horizon_days]`.
    pub async fn run_once(&self, today: NaiveDate) -> CoreResult<SweepStats> {
        let mut stats = SweepStats::default();
        let shops = self.gateway.active_shops().await?;
        stats.shops = shops.len();

        for shop_id in &shops {
            for offset in 0..=self.config.horizon_days {
                let date = today + chrono::Duration::days(offset as i64);
                self.sweep_shop_date(shop_id, date, &mut stats).await?;
            }
        }

        if stats.detected > 0 || stats.resolved > 0 {
            info!(
                shops = stats.shops,
                detected = stats.detected,
                persisted = stats.persisted,
                resolved = stats.resolved,
                deferred = stats.deferred,
                "Conflict sweep round finished"
            );
        }
        Ok(stats)
    }

    async fn sweep_shop_date(
        &self,
        shop_id: &str,
        date: NaiveDate,
        stats: &mut SweepStats,
    ) -> CoreResult<()> {
        let found = self
            .detector
            .detect(shop_id, date, self.config.min_severity)
            .await?;
        stats.detected += found.len();

        // Skip conflicts already persisted and still open.
        let open = self.gateway.open_conflicts(shop_id, date).await?;
        let open_keys: HashSet<(ConflictKind, Vec<Uuid>)> = open
            .iter()
            .map(|c| (c.kind, c.member_key()))
            .collect();
        let fresh: Vec<Conflict> = found
            .into_iter()
            .filter(|c| !open_keys.contains(&(c.kind, c.member_key())))
            .collect();

        if !fresh.is_empty() {
            self.persist(&fresh).await?;
            stats.persisted += fresh.len();
            for conflict in &fresh {
                self.bus
                    .publish(Event::ConflictDetected(ConflictDetectedEvent {
                        conflict_id: conflict.id,
                        shop_id: conflict.shop_id.clone(),
                        kind: conflict.kind.as_str().to_string(),
                        severity: conflict.severity.as_str().to_string(),
                        reservation_ids: conflict.member_key(),
                    }));
            }
        }

        if self.config.auto_resolve {
            // Open conflicts from earlier rounds get another chance too.
            let mut to_resolve: Vec<Uuid> = open.iter().map(|c| c.id).collect();
            to_resolve.extend(fresh.iter().map(|c| c.id));
            for conflict_id in to_resolve {
                match self.resolver.resolve(conflict_id, Actor::system()).await {
                    Ok(_) => stats.resolved += 1,
                    Err(CoreError::ResolutionDeferred { reason, .. }) => {
                        stats.deferred += 1;
                        debug!(
                            conflict_id = %conflict_id,
                            reason = %reason,
                            "Resolution deferred to the admin path"
                        );
                    }
                    Err(err) => {
                        warn!(
                            conflict_id = %conflict_id,
                            error = %err,
                            "Automatic resolution failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn persist(&self, conflicts: &[Conflict]) -> CoreResult<()> {
        let batch = conflicts.to_vec();
        self.coordinator
            .execute_in_transaction(&TransactionOptions::default(), move |uow, ctx| {
                let batch = batch.clone();
                Box::pin(async move {
                    for conflict in batch {
                        let token = ctx.record(
                            "conflict",
                            "insert",
                            json!({
                                "conflict_id": conflict.id,
                                "kind": conflict.kind.as_str(),
                            }),
                        );
                        match uow.insert_conflict(conflict).await {
                            Ok(()) => ctx.mark_executed(token),
                            Err(err) => {
                                ctx.mark_failed(token);
                                return Err(err);
                            }
                        }
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Spawn the periodic sweep loop.
    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) {
        let interval_secs = self.config.interval_secs;
        tokio::spawn(async move {
            info!(interval = interval_secs, "Conflict sweep task started");
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let today = Utc::now().date_naive();
                        if let Err(err) = self.run_once(today).await {
                            warn!(error = %err, "Conflict sweep round failed");
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Conflict sweep task shutting down");
                        break;
                    }
                }
            }
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────
