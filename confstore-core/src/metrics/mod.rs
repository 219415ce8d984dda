//! Metrics for engine activity
//!
//! Names are registered with the global `metrics` recorder. Without an
//! installed recorder every call is a no-op.

use ::metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Register descriptions for every engine metric
pub fn init_metrics() {
    // Local commit path
    describe_counter!("confstore.records.initialized", "Records persisted by finalize");
    describe_counter!("confstore.writes.committed", "Keyed values persisted by finalize");
    describe_counter!("confstore.finalize.total", "Successful finalize calls");
    describe_histogram!("confstore.finalize.duration_ms", "Finalize duration in milliseconds");

    // Publishing
    describe_counter!("confstore.messages.published", "Replication messages published");
    describe_counter!("confstore.messages.publish_failed", "Replication messages the transport refused");

    // Replication intake
    describe_counter!("confstore.messages.received", "Replication messages consumed");
    describe_counter!("confstore.messages.rejected", "Replication messages failing validation");
    describe_counter!("confstore.messages.echo_dropped", "Own replication messages ignored");
    describe_counter!("confstore.writes.replicated", "Remote keyed values applied");
    describe_counter!("confstore.writes.replication_failed", "Remote keyed values that could not be applied");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        record_histogram(self.name, duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        // No recorder is installed in tests; registration must still be harmless
        init_metrics();
        record_counter("confstore.finalize.total", 1);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("confstore.finalize.duration_ms");
        std::thread::sleep(std::time::Duration::from_millis(5));
        timer.stop();
    }
}
