//! Engine and decoupler statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a keyed window engine
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Updates delivered to the engine
    events: AtomicU64,
    /// Removes delivered to the engine
    removes: AtomicU64,
    /// Aggregates published downstream
    emissions: AtomicU64,
    /// Trigger timers that ran
    timer_fires: AtomicU64,
    /// Failures reported on the failure channel
    failures: AtomicU64,
    /// Key lanes created
    lanes_created: AtomicU64,
    /// Key lanes torn down by removes
    lanes_removed: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission(&self) {
        self.emissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timer_fire(&self) {
        self.timer_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lane_created(&self) {
        self.lanes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lane_removed(&self) {
        self.lanes_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }

    pub fn emissions(&self) -> u64 {
        self.emissions.load(Ordering::Relaxed)
    }

    pub fn timer_fires(&self) -> u64 {
        self.timer_fires.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn lanes_created(&self) -> u64 {
        self.lanes_created.load(Ordering::Relaxed)
    }

    pub fn lanes_removed(&self) -> u64 {
        self.lanes_removed.load(Ordering::Relaxed)
    }

    /// Lanes currently alive
    pub fn active_lanes(&self) -> u64 {
        self.lanes_created().saturating_sub(self.lanes_removed())
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.events.store(0, Ordering::Relaxed);
        self.removes.store(0, Ordering::Relaxed);
        self.emissions.store(0, Ordering::Relaxed);
        self.timer_fires.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.lanes_created.store(0, Ordering::Relaxed);
        self.lanes_removed.store(0, Ordering::Relaxed);
    }
}

impl Clone for EngineStats {
    fn clone(&self) -> Self {
        Self {
            events: AtomicU64::new(self.events()),
            removes: AtomicU64::new(self.removes()),
            emissions: AtomicU64::new(self.emissions()),
            timer_fires: AtomicU64::new(self.timer_fires()),
            failures: AtomicU64::new(self.failures()),
            lanes_created: AtomicU64::new(self.lanes_created()),
            lanes_removed: AtomicU64::new(self.lanes_removed()),
        }
    }
}

/// Counters of a temporal decoupler
#[derive(Debug, Default)]
pub struct DecouplerStats {
    received: AtomicU64,
    ticks: AtomicU64,
    emitted: AtomicU64,
    stale_ticks: AtomicU64,
}

impl DecouplerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self, emitted: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.emitted.fetch_add(emitted, Ordering::Relaxed);
    }

    pub fn record_stale_tick(&self) {
        self.stale_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Timer callbacks ignored because they belonged to an earlier arming
    pub fn stale_ticks(&self) -> u64 {
        self.stale_ticks.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.emitted.store(0, Ordering::Relaxed);
        self.stale_ticks.store(0, Ordering::Relaxed);
    }
}

impl Clone for DecouplerStats {
    fn clone(&self) -> Self {
        Self {
            received: AtomicU64::new(self.received()),
            ticks: AtomicU64::new(self.ticks()),
            emitted: AtomicU64::new(self.emitted()),
            stale_ticks: AtomicU64::new(self.stale_ticks()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_stats_recording() {
        let stats = EngineStats::new();
        stats.record_event();
        stats.record_event();
        stats.record_emission();
        stats.record_lane_created();
        stats.record_lane_created();
        stats.record_lane_removed();

        assert_eq!(stats.events(), 2);
        assert_eq!(stats.emissions(), 1);
        assert_eq!(stats.active_lanes(), 1);
    }

    #[test]
    fn test_engine_stats_reset_and_clone() {
        let stats = EngineStats::new();
        stats.record_failure();
        stats.record_timer_fire();

        let cloned = stats.clone();
        stats.reset();

        assert_eq!(stats.failures(), 0);
        assert_eq!(cloned.failures(), 1);
        assert_eq!(cloned.timer_fires(), 1);
    }

    #[test]
    fn test_decoupler_stats() {
        let stats = DecouplerStats::new();
        stats.record_received();
        stats.record_tick(3);
        stats.record_tick(0);
        stats.record_stale_tick();

        assert_eq!(stats.ticks(), 2);
        assert_eq!(stats.emitted(), 3);
        assert_eq!(stats.stale_ticks(), 1);
        assert_eq!(stats.clone().received(), 1);
    }
}
