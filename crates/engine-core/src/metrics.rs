use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    batches_pulled: AtomicU64,
    batches_completed: AtomicU64,
    pages_fetched: AtomicU64,
    records_stored: AtomicU64,
    bytes_stored: AtomicU64,
    tasks_started: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Counters shared between the collector's scheduling loop and its tasks.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_pulled: u64,
    pub batches_completed: u64,
    pub pages_fetched: u64,
    pub records_stored: u64,
    pub bytes_stored: u64,
    pub tasks_started: u64,
    pub peak_in_flight: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_batches_pulled(&self) {
        self.inner.batches_pulled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_completed(&self) {
        self.inner.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pages(&self) {
        self.inner.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_records(&self, count: u64, bytes: u64) {
        self.inner.records_stored.fetch_add(count, Ordering::Relaxed);
        self.inner.bytes_stored.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Marks a task as running and updates the high-water mark.
    pub fn task_started(&self) {
        self.inner.tasks_started.fetch_add(1, Ordering::Relaxed);
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub fn task_finished(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> u64 {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_pulled: self.inner.batches_pulled.load(Ordering::Relaxed),
            batches_completed: self.inner.batches_completed.load(Ordering::Relaxed),
            pages_fetched: self.inner.pages_fetched.load(Ordering::Relaxed),
            records_stored: self.inner.records_stored.load(Ordering::Relaxed),
            bytes_stored: self.inner.bytes_stored.load(Ordering::Relaxed),
            tasks_started: self.inner.tasks_started.load(Ordering::Relaxed),
            peak_in_flight: self.inner.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
