//! Pipeline counters
//!
//! Lock-free counters updated on the hot path and rendered on demand by
//! `GET /metrics`. Gauges that belong to other components (queue depth,
//! tracked identities) are passed in when the snapshot is taken.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::hub::FlushTrigger;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Ingestion
    pub updates_accepted: AtomicU64,
    pub updates_invalid: AtomicU64,
    pub updates_rate_limited: AtomicU64,
    pub updates_queue_full: AtomicU64,
    pub persistence_failures: AtomicU64,

    // Broadcasting
    pub batches_by_size: AtomicU64,
    pub batches_by_interval: AtomicU64,
    pub batches_at_shutdown: AtomicU64,
    pub updates_broadcast: AtomicU64,

    // Connections
    pub connections_registered: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_evicted: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.updates_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.updates_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.updates_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.updates_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, trigger: FlushTrigger, size: usize) {
        let counter = match trigger {
            FlushTrigger::Size => &self.batches_by_size,
            FlushTrigger::Interval => &self.batches_by_interval,
            FlushTrigger::Shutdown => &self.batches_at_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.updates_broadcast
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_registered(&self) {
        self.connections_registered.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregistered(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.connections_evicted.fetch_add(1, Ordering::Relaxed);
        self.record_unregistered();
    }

    pub fn snapshot(&self, queue_depth: usize, tracked_identities: usize) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            updates_accepted: load(&self.updates_accepted),
            updates_invalid: load(&self.updates_invalid),
            updates_rate_limited: load(&self.updates_rate_limited),
            updates_queue_full: load(&self.updates_queue_full),
            persistence_failures: load(&self.persistence_failures),
            batches_by_size: load(&self.batches_by_size),
            batches_by_interval: load(&self.batches_by_interval),
            batches_at_shutdown: load(&self.batches_at_shutdown),
            updates_broadcast: load(&self.updates_broadcast),
            connections_registered: load(&self.connections_registered),
            connections_active: load(&self.connections_active),
            connections_evicted: load(&self.connections_evicted),
            queue_depth,
            tracked_identities,
        }
    }
}

/// Point-in-time view of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub updates_accepted: u64,
    pub updates_invalid: u64,
    pub updates_rate_limited: u64,
    pub updates_queue_full: u64,
    pub persistence_failures: u64,
    pub batches_by_size: u64,
    pub batches_by_interval: u64,
    pub batches_at_shutdown: u64,
    pub updates_broadcast: u64,
    pub connections_registered: u64,
    pub connections_active: u64,
    pub connections_evicted: u64,
    pub queue_depth: usize,
    pub tracked_identities: usize,
}
