//! Deadlock detection over a wait-for graph
//!
//! Transactions hold resources and wait on resources held by others. A
//! cycle in `waiter -> resource -> holder` means no involved transaction
//! can make progress; the coordinator classifies the reporting attempt as
//! retryable instead of waiting for a storage-level timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use metrics::counter;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{CoreError, CoreResult};

/// A contended resource, e.g. `("reservation", "<uuid>")`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: &'static str,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn reservation(id: Uuid) -> Self {
        Self::new("reservation", id.to_string())
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Default)]
struct Graph {
    /// resource -> transaction currently holding it
    holders: HashMap<ResourceKey, Uuid>,
    /// transaction -> resources it is waiting for
    waits: HashMap<Uuid, HashSet<ResourceKey>>,
}

/// Wait-for graph with on-registration cycle detection.
///
/// Bookkeeping only: the detector never blocks or grants anything; the
/// storage's isolation level stays the sole ordering authority.
pub struct DeadlockDetector {
    graph: Mutex<Graph>,
    detected: AtomicU64,
}

impl DeadlockDetector {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(Graph::default()),
            detected: AtomicU64::new(0),
        }
    }

    /// Record that `tx` now holds `resource`, clearing any wait edge it
    /// had on that resource.
    pub fn register_hold(&self, tx: Uuid, resource: ResourceKey) {
        let mut graph = self.graph.lock().expect("wait-for graph poisoned");
        if let Some(waiting) = graph.waits.get_mut(&tx) {
            waiting.remove(&resource);
        }
        graph.holders.insert(resource, tx);
    }

    /// Register a wait edge `tx -> resource` and check for a cycle.
    ///
    /// On cycle detection the edge is withdrawn (the waiter is expected to
    /// abort) and `DeadlockDetected` is returned.
    pub fn check_wait(&self, tx: Uuid, resource: ResourceKey) -> CoreResult<()> {
        let mut graph = self.graph.lock().expect("wait-for graph poisoned");

        // Waiting on a resource you hold is a no-op, not a deadlock.
        if graph.holders.get(&resource) == Some(&tx) {
            return Ok(());
        }

        graph.waits.entry(tx).or_default().insert(resource.clone());

        if find_cycle(&graph.holders, &graph.waits, tx) {
            if let Some(waiting) = graph.waits.get_mut(&tx) {
                waiting.remove(&resource);
            }
            drop(graph);

            self.detected.fetch_add(1, Ordering::SeqCst);
            counter!("booking_deadlocks_detected_total").increment(1);
            warn!(transaction_id = %tx, resource = %resource, "Deadlock cycle detected");
            return Err(CoreError::DeadlockDetected { transaction_id: tx });
        }
        Ok(())
    }

    /// Drop every edge involving a finished transaction.
    pub fn release(&self, tx: Uuid) {
        let mut graph = self.graph.lock().expect("wait-for graph poisoned");
        graph.waits.remove(&tx);
        graph.holders.retain(|_, holder| *holder != tx);
    }

    /// Total deadlocks detected since construction.
    pub fn detected_count(&self) -> u64 {
        self.detected.load(Ordering::SeqCst)
    }
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-first search for a cycle reachable from `start`: does some chain
/// of `waiter -> resource -> holder` edges lead back to `start`?
fn find_cycle(
    holders: &HashMap<ResourceKey, Uuid>,
    waits: &HashMap<Uuid, HashSet<ResourceKey>>,
    start: Uuid,
) -> bool {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut stack: Vec<Uuid> = vec![start];

    while let Some(tx) = stack.pop() {
        if !visited.insert(tx) {
            continue;
        }
        let Some(waiting_on) = waits.get(&tx) else {
            continue;
        };
        for resource in waiting_on {
            if let Some(&holder) = holders.get(resource) {
                if holder == start {
                    return true;
                }
                stack.push(holder);
            }
        }
    }
    false
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn res(id: &str) -> ResourceKey {
        ResourceKey::new("reservation", id)
    }

    #[test]
    fn two_transaction_cycle_is_detected() {
        let detector = DeadlockDetector::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        detector.register_hold(t1, res("r1"));
        detector.register_hold(t2, res("r2"));

        detector.check_wait(t1, res("r2")).unwrap();
        let err = detector.check_wait(t2, res("r1")).unwrap_err();

        assert!(matches!(
            err,
            CoreError::DeadlockDetected { transaction_id } if transaction_id == t2
        ));
        assert_eq!(detector.detected_count(), 1);
    }

    #[test]
    fn three_transaction_cycle_is_detected() {
        let detector = DeadlockDetector::new();
        let (t1, t2, t3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        detector.register_hold(t1, res("a"));
        detector.register_hold(t2, res("b"));
        detector.register_hold(t3, res("c"));

        detector.check_wait(t1, res("b")).unwrap();
        detector.check_wait(t2, res("c")).unwrap();
        assert!(detector.check_wait(t3, res("a")).is_err());
    }

    #[test]
    fn waiting_without_cycle_is_fine() {
        let detector = DeadlockDetector::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        detector.register_hold(t1, res("r1"));
        detector.check_wait(t2, res("r1")).unwrap();
        assert_eq!(detector.detected_count(), 0);
    }

    #[test]
    fn waiting_on_own_resource_is_noop() {
        let detector = DeadlockDetector::new();
        let t1 = Uuid::new_v4();
        detector.register_hold(t1, res("r1"));
        detector.check_wait(t1, res("r1")).unwrap();
    }

    #[test]
    fn release_breaks_the_cycle_potential() {
        let detector = DeadlockDetector::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        detector.register_hold(t1, res("r1"));
        detector.register_hold(t2, res("r2"));
        detector.check_wait(t1, res("r2")).unwrap();

        // t1 finishes; its hold and waits disappear.
        detector.release(t1);
        detector.check_wait(t2, res("r1")).unwrap();
        assert_eq!(detector.detected_count(), 0);
    }

    #[test]
    fn rejected_wait_edge_is_withdrawn() {
        let detector = DeadlockDetector::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        detector.register_hold(t1, res("r1"));
        detector.register_hold(t2, res("r2"));
        detector.check_wait(t1, res("r2")).unwrap();
        assert!(detector.check_wait(t2, res("r1")).is_err());

        // t2 aborted and released; t1's wait can now be satisfied without
        // a phantom edge from the rejected attempt.
        detector.release(t2);
        detector.check_wait(t1, res("r2")).unwrap();
        assert_eq!(detector.detected_count(), 1);
    }
}
