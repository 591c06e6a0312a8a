use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StoreMetrics {
    // Counters
    pub optimistic_applied: AtomicU64,
    pub reconciled: AtomicU64,
    pub rolled_back: AtomicU64,
    pub conflicts_rejected: AtomicU64,
    pub implicit_removals: AtomicU64,
    pub deletes_armed: AtomicU64,
    pub deletes_cancelled: AtomicU64,
    pub deletes_confirmed: AtomicU64,
    pub loads_applied: AtomicU64,
    pub loads_superseded: AtomicU64,

    // Completions that arrived after a load replaced local state
    pub stale_completions: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            optimistic_applied: self.optimistic_applied.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            conflicts_rejected: self.conflicts_rejected.load(Ordering::Relaxed),
            implicit_removals: self.implicit_removals.load(Ordering::Relaxed),
            deletes_armed: self.deletes_armed.load(Ordering::Relaxed),
            deletes_cancelled: self.deletes_cancelled.load(Ordering::Relaxed),
            deletes_confirmed: self.deletes_confirmed.load(Ordering::Relaxed),
            loads_applied: self.loads_applied.load(Ordering::Relaxed),
            loads_superseded: self.loads_superseded.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub optimistic_applied: u64,
    pub reconciled: u64,
    pub rolled_back: u64,
    pub conflicts_rejected: u64,
    pub implicit_removals: u64,
    pub deletes_armed: u64,
    pub deletes_cancelled: u64,
    pub deletes_confirmed: u64,
    pub loads_applied: u64,
    pub loads_superseded: u64,
    pub stale_completions: u64,
}
