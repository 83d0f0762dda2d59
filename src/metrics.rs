// Metrics tracking for queue operations
// Thread-local storage to avoid contention between transactions
thread_local! {
    static METRICS: std::cell::RefCell<QueueMetrics> = const { std::cell::RefCell::new(QueueMetrics::new_const()) };
}

/// Counters for the current thread
#[derive(Debug, Default, Clone)]
struct QueueMetrics {
    /// Operations appended to the queue
    total_enqueued: u64,
    /// Number of non-empty flushes
    total_flushes: u64,
    /// Raw operations consumed by flushes
    total_raw_operations: u64,
    /// Collapsed operations dispatched by flushes
    total_dispatched: u64,
    /// Largest single flush (collapsed operations)
    max_batch: usize,
    /// Total timing for flushes (nanoseconds)
    total_timing_ns: u128,
    /// Queue aborts
    aborts: u64,
    /// Savepoint rollbacks applied to the queue
    savepoint_rollbacks: u64,
}

impl QueueMetrics {
    const fn new_const() -> Self {
        Self {
            total_enqueued: 0,
            total_flushes: 0,
            total_raw_operations: 0,
            total_dispatched: 0,
            max_batch: 0,
            total_timing_ns: 0,
            aborts: 0,
            savepoint_rollbacks: 0,
        }
    }
}

/// Public interface for metrics tracking
pub mod metrics_api {
    use super::*;

    pub fn record_enqueue() {
        METRICS.with(|m| {
            m.borrow_mut().total_enqueued += 1;
        });
    }

    /// Record the start of a flush
    pub fn record_flush_start() -> FlushTimer {
        FlushTimer::new()
    }

    /// Record completion of a flush
    pub fn record_flush_complete(raw_count: usize, dispatched: usize, timer: FlushTimer) {
        METRICS.with(|m| {
            let mut metrics = m.borrow_mut();
            metrics.total_flushes += 1;
            metrics.total_raw_operations += raw_count as u64;
            metrics.total_dispatched += dispatched as u64;
            metrics.max_batch = metrics.max_batch.max(dispatched);
            metrics.total_timing_ns += timer.elapsed_ns();
        });
    }

    pub fn record_abort() {
        METRICS.with(|m| {
            m.borrow_mut().aborts += 1;
        });
    }

    pub fn record_savepoint_rollback() {
        METRICS.with(|m| {
            m.borrow_mut().savepoint_rollbacks += 1;
        });
    }

    /// Get current queue statistics
    pub fn get_queue_stats() -> QueueStats {
        let queue_size = crate::queue::get_queue_size();

        METRICS.with(|m| {
            let metrics = m.borrow();
            QueueStats {
                queue_size,
                total_enqueued: metrics.total_enqueued,
                total_flushes: metrics.total_flushes,
                total_raw_operations: metrics.total_raw_operations,
                total_dispatched: metrics.total_dispatched,
                max_batch: metrics.max_batch,
                total_timing_ns: metrics.total_timing_ns,
                aborts: metrics.aborts,
                savepoint_rollbacks: metrics.savepoint_rollbacks,
            }
        })
    }

    /// Reset metrics for this thread
    pub fn reset_metrics() {
        METRICS.with(|m| {
            *m.borrow_mut() = QueueMetrics::default();
        });
    }
}

/// Timer for measuring flush duration
pub struct FlushTimer {
    start: std::time::Instant,
}

impl FlushTimer {
    fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    fn elapsed_ns(&self) -> u128 {
        self.start.elapsed().as_nanos()
    }
}

/// Statistics returned by metrics functions
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_size: usize,
    pub total_enqueued: u64,
    pub total_flushes: u64,
    pub total_raw_operations: u64,
    pub total_dispatched: u64,
    pub max_batch: usize,
    pub total_timing_ns: u128,
    pub aborts: u64,
    pub savepoint_rollbacks: u64,
}

impl QueueStats {
    /// Convert timing to milliseconds
    pub fn total_timing_ms(&self) -> f64 {
        self.total_timing_ns as f64 / 1_000_000.0
    }

    /// Fraction of raw operations removed by collapsing
    pub fn collapse_ratio(&self) -> f64 {
        if self.total_raw_operations == 0 {
            0.0
        } else {
            1.0 - self.total_dispatched as f64 / self.total_raw_operations as f64
        }
    }
}
