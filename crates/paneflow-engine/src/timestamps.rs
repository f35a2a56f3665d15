//! Timestamp assignment for incoming elements

use crate::schedule::Scheduler;
use paneflow_core::TimestampMs;
use std::fmt;
use std::sync::Arc;

/// Where an element's timestamp comes from
pub enum TimestampAssigner<T> {
    /// The scheduler clock at arrival
    Clock,
    /// A timestamp carried by the element itself
    Data(Arc<dyn Fn(&T) -> TimestampMs + Send + Sync>),
}

impl<T> TimestampAssigner<T> {
    pub fn from_clock() -> Self {
        TimestampAssigner::Clock
    }

    pub fn from_data(f: impl Fn(&T) -> TimestampMs + Send + Sync + 'static) -> Self {
        TimestampAssigner::Data(Arc::new(f))
    }

    pub fn assign(&self, value: &T, scheduler: &dyn Scheduler) -> TimestampMs {
        match self {
            TimestampAssigner::Clock => scheduler.now(),
            TimestampAssigner::Data(f) => f(value),
        }
    }

    pub fn is_clock(&self) -> bool {
        matches!(self, TimestampAssigner::Clock)
    }
}

impl<T> Default for TimestampAssigner<T> {
    fn default() -> Self {
        TimestampAssigner::Clock
    }
}

impl<T> Clone for TimestampAssigner<T> {
    fn clone(&self) -> Self {
        match self {
            TimestampAssigner::Clock => TimestampAssigner::Clock,
            TimestampAssigner::Data(f) => TimestampAssigner::Data(f.clone()),
        }
    }
}

impl<T> fmt::Debug for TimestampAssigner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampAssigner::Clock => write!(f, "Clock"),
            TimestampAssigner::Data(_) => write!(f, "Data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualScheduler;
    use paneflow_core::Timestamped;

    #[test]
    fn test_clock_and_data_timestamps() {
        let scheduler = ManualScheduler::starting_at(42);
        let reading = Timestamped::new(7, 1.5f64);

        let clock = TimestampAssigner::from_clock();
        assert!(clock.is_clock());
        assert_eq!(clock.assign(&reading, &scheduler), 42);

        let data = TimestampAssigner::from_data(|r: &Timestamped<f64>| r.timestamp);
        assert_eq!(data.clone().assign(&reading, &scheduler), 7);
    }
}
