use crate::counter::Counter;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Number of measurements currently in the window
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage counters shared by all workers of the stage.
///
/// Cloning yields another handle to the same counters.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Items transformed and forwarded downstream
    processed: Arc<Counter>,
    /// Items whose transform failed
    failed: Arc<Counter>,
    /// Transformed items lost because the output channel was closed
    dropped: Arc<Counter>,
    /// Transform latency
    latency: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(Counter::default()),
            failed: Arc::new(Counter::default()),
            dropped: Arc::new(Counter::default()),
            latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    pub fn record_processed(&self) {
        self.processed.increment();
    }

    pub fn record_failed(&self) {
        self.failed.increment();
    }

    pub fn record_dropped(&self) {
        self.dropped.increment();
    }

    /// Record how long one transform call took
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency.record(elapsed.as_nanos().min(u64::MAX as u128) as u64);
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.get().max(0) as u64
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.get().max(0) as u64
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.get().max(0) as u64
    }

    /// Processed items per second since the stage started
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_processed() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: self.total_processed(),
            total_failed: self.total_failed(),
            total_dropped: self.total_dropped(),
            throughput_ips: self.throughput_ips(),
            latency_p50_us: self.latency.p50_us(),
            latency_p95_us: self.latency.p95_us(),
            latency_p99_us: self.latency.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_dropped: u64,
    pub throughput_ips: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Processed: {}, Failed: {}, Dropped: {}, Throughput: {:.2} items/s, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_processed,
            self.total_failed,
            self.total_dropped,
            self.throughput_ips,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
