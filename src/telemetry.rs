use std::sync::atomic::{AtomicU64, Ordering};

/// Per-adapter counters.
#[derive(Default, Debug)]
pub struct AdapterMetrics {
    pub queries_total: AtomicU64,
    pub deferred_total: AtomicU64,
    pub connect_attempts: AtomicU64,
    pub connect_failures: AtomicU64,
    pub populate_lookups: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub deferred_total: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub populate_lookups: u64,
}

impl AdapterMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            deferred_total: self.deferred_total.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            populate_lookups: self.populate_lookups.load(Ordering::Relaxed),
        }
    }

    /// OpenMetrics-style text rendering of the counters.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        let s = self.snapshot();
        format!(
            "nexus_adapter_queries_total {}\nnexus_adapter_deferred_total {}\nnexus_adapter_connect_attempts_total {}\nnexus_adapter_connect_failures_total {}\nnexus_adapter_populate_lookups_total {}\n",
            s.queries_total, s.deferred_total, s.connect_attempts, s.connect_failures, s.populate_lookups
        )
    }
}
