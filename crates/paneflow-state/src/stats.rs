//! Persistence statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for traffic through a persistence provider
#[derive(Debug, Default)]
pub struct StateStats {
    /// Number of read operations
    reads: AtomicU64,
    /// Number of write operations (sets, adds, inserts)
    writes: AtomicU64,
    /// Number of removals and clears
    removals: AtomicU64,
    /// Number of operations rejected by the backend
    failures: AtomicU64,
    /// Total bytes written
    bytes_written: AtomicU64,
}

impl StateStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.removals.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

impl Clone for StateStats {
    fn clone(&self) -> Self {
        Self {
            reads: AtomicU64::new(self.reads()),
            writes: AtomicU64::new(self.writes()),
            removals: AtomicU64::new(self.removals()),
            failures: AtomicU64::new(self.failures()),
            bytes_written: AtomicU64::new(self.bytes_written()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recording() {
        let stats = StateStats::new();

        stats.record_read();
        stats.record_write(10);
        stats.record_write(5);
        stats.record_removal();

        assert_eq!(stats.reads(), 1);
        assert_eq!(stats.writes(), 2);
        assert_eq!(stats.bytes_written(), 15);
        assert_eq!(stats.removals(), 1);
    }

    #[test]
    fn test_reset_and_clone() {
        let stats = StateStats::new();
        stats.record_write(3);
        stats.record_failure();

        let cloned = stats.clone();
        stats.reset();

        assert_eq!(stats.writes(), 0);
        assert_eq!(stats.failures(), 0);
        assert_eq!(cloned.writes(), 1);
        assert_eq!(cloned.failures(), 1);
    }
}
