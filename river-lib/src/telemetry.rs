//! Process-wide operational counters and readiness state.
//!
//! Counters are plain relaxed atomics: they are diagnostics, not control
//! flow. The readiness state backs the ingress `/readiness` probe.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters shared by the poller, ingress, and publisher.
#[derive(Debug, Default)]
pub struct CollectorStats {
    events_published: AtomicU64,
    events_dropped: AtomicU64,
    events_unrouted: AtomicU64,
    parse_failures: AtomicU64,
    auth_failures: AtomicU64,
    messages_abandoned: AtomicU64,
}

impl CollectorStats {
    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// An event dropped because the producer's local queue was full.
    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// An event whose topic no configured broker advertises.
    pub fn record_unrouted(&self) {
        self.events_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages still unflushed when the shutdown deadline expired.
    pub fn record_abandoned(&self, count: u64) {
        self.messages_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_unrouted: self.events_unrouted.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            messages_abandoned: self.messages_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Serializable counter snapshot, logged at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_published: u64,
    pub events_dropped: u64,
    pub events_unrouted: u64,
    pub parse_failures: u64,
    pub auth_failures: u64,
    pub messages_abandoned: u64,
}

/// Readiness gates for the ingress probe.
///
/// Ready iff the publisher holds at least one broker connection and the
/// inventory loop has completed at least one iteration.
#[derive(Debug, Default)]
pub struct ReadinessState {
    publisher_connected: AtomicBool,
    inventory_primed: AtomicBool,
}

impl ReadinessState {
    pub fn set_publisher_connected(&self, connected: bool) {
        self.publisher_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_inventory_primed(&self) {
        self.inventory_primed.store(true, Ordering::Relaxed);
    }

    pub fn inventory_primed(&self) -> bool {
        self.inventory_primed.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.publisher_connected.load(Ordering::Relaxed)
            && self.inventory_primed.load(Ordering::Relaxed)
    }
}
