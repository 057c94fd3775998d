use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters maintained by the persist worker
pub struct PersistMetrics {
    blocks_written: AtomicU64,
    frames_written: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl PersistMetrics {
    pub fn new() -> Self {
        Self {
            blocks_written: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn start_write(&self) -> Instant {
        Instant::now()
    }

    pub fn record_block(&self, frames: usize, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        self.frames_written.fetch_add(frames as u64, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }

    pub fn generate_report(&self) -> String {
        format!(
            "=== Persist Metrics ===\n  Blocks: {}\n  Frames: {}\n  Failures: {}\n  Avg Flush Latency: {}μs\n",
            self.blocks_written(),
            self.frames_written(),
            self.failures(),
            self.avg_latency_us()
        )
    }
}

impl Default for PersistMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_block() {
        let metrics = PersistMetrics::new();
        let start = metrics.start_write();
        metrics.record_block(50, start);
        metrics.record_block(7, start);

        assert_eq!(metrics.blocks_written(), 2);
        assert_eq!(metrics.frames_written(), 57);
        assert_eq!(metrics.failures(), 0);
    }

    #[test]
    fn test_report_lists_plain_counts() {
        let metrics = PersistMetrics::new();
        metrics.record_failure();
        metrics.record_failure();
        metrics.record_failure();
        let report = metrics.generate_report();
        assert!(report.contains("  Failures: 3\n"));
        assert!(report.contains("  Frames: 0\n"));
    }
}
