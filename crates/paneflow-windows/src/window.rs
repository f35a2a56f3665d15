//! Window tokens and assigners
//!
//! A window is an orderable token naming one aggregation interval of a key.
//! Assigners map each timestamped event to the windows it belongs to.

use paneflow_core::{Result, StreamError, TimestampMs};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed-open interval `[start, end)` of milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

impl TimeInterval {
    pub fn new(start: TimestampMs, end: TimestampMs) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: TimestampMs) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn length(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The single window that spans all time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalWindow;

impl fmt::Display for GlobalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global")
    }
}

/// Windows with a known closing time
pub trait BoundedWindow {
    /// Time at which the window stops accepting events, if it ever does
    fn end_time(&self) -> Option<TimestampMs>;
}

impl BoundedWindow for TimeInterval {
    fn end_time(&self) -> Option<TimestampMs> {
        Some(self.end)
    }
}

impl BoundedWindow for GlobalWindow {
    fn end_time(&self) -> Option<TimestampMs> {
        None
    }
}

/// Maps an event to the windows it belongs to
pub trait WindowAssigner<T, W>: Send + Sync {
    /// Windows of the event, in ascending window order
    fn assign(&self, value: &T, timestamp: TimestampMs) -> Vec<W>;
}

/// Fixed-size, non-overlapping intervals aligned to `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindows {
    size: i64,
    offset: i64,
}

impl TumblingWindows {
    pub fn new(size: i64) -> Result<Self> {
        Self::with_offset(size, 0)
    }

    pub fn with_offset(size: i64, offset: i64) -> Result<Self> {
        if size <= 0 {
            return Err(StreamError::Configuration(format!(
                "tumbling window size must be positive, got {}",
                size
            )));
        }
        Ok(Self {
            size,
            offset: offset.rem_euclid(size),
        })
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    /// The interval containing `timestamp`
    pub fn window_for(&self, timestamp: TimestampMs) -> TimeInterval {
        let index = timestamp.saturating_sub(self.offset).div_euclid(self.size);
        let start = index.saturating_mul(self.size).saturating_add(self.offset);
        TimeInterval::new(start, start.saturating_add(self.size))
    }
}

impl<T> WindowAssigner<T, TimeInterval> for TumblingWindows {
    fn assign(&self, _value: &T, timestamp: TimestampMs) -> Vec<TimeInterval> {
        vec![self.window_for(timestamp)]
    }
}

/// Overlapping intervals of `size`, one starting every `slide`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindows {
    size: i64,
    slide: i64,
}

impl SlidingWindows {
    pub fn new(size: i64, slide: i64) -> Result<Self> {
        if size <= 0 || slide <= 0 {
            return Err(StreamError::Configuration(format!(
                "sliding window size and slide must be positive, got {} and {}",
                size, slide
            )));
        }
        if slide > size {
            return Err(StreamError::Configuration(format!(
                "sliding window slide {} exceeds size {}",
                slide, size
            )));
        }
        Ok(Self { size, slide })
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn slide(&self) -> i64 {
        self.slide
    }
}

impl<T> WindowAssigner<T, TimeInterval> for SlidingWindows {
    fn assign(&self, _value: &T, timestamp: TimestampMs) -> Vec<TimeInterval> {
        // Widened so starts before the first representable instant stay exact.
        let (timestamp, size, slide) = (
            i128::from(timestamp),
            i128::from(self.size),
            i128::from(self.slide),
        );
        let mut windows = Vec::with_capacity((self.size / self.slide) as usize + 1);
        let mut start = timestamp.div_euclid(slide) * slide;
        while start > timestamp - size {
            windows.push(TimeInterval::new(clamp(start), clamp(start + size)));
            start -= slide;
        }
        windows.reverse();
        windows
    }
}

fn clamp(instant: i128) -> TimestampMs {
    instant.clamp(i128::from(TimestampMs::MIN), i128::from(TimestampMs::MAX)) as TimestampMs
}

/// Assigns every event to [`GlobalWindow`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalWindows;

impl<T> WindowAssigner<T, GlobalWindow> for GlobalWindows {
    fn assign(&self, _value: &T, _timestamp: TimestampMs) -> Vec<GlobalWindow> {
        vec![GlobalWindow]
    }
}

/// Window kinds constructible from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowKind {
    /// Fixed-size non-overlapping windows
    Tumbling { size_ms: i64 },
    /// Overlapping windows with size and slide
    Sliding { size_ms: i64, slide_ms: i64 },
}

impl WindowKind {
    /// Create a tumbling window kind
    pub fn tumbling(size_ms: i64) -> Self {
        Self::Tumbling { size_ms }
    }

    /// Create a sliding window kind
    pub fn sliding(size_ms: i64, slide_ms: i64) -> Self {
        Self::Sliding { size_ms, slide_ms }
    }

    /// Create an assigner for this kind
    pub fn create_assigner<T>(&self) -> Result<Box<dyn WindowAssigner<T, TimeInterval>>> {
        Ok(match self {
            WindowKind::Tumbling { size_ms } => Box::new(TumblingWindows::new(*size_ms)?),
            WindowKind::Sliding { size_ms, slide_ms } => {
                Box::new(SlidingWindows::new(*size_ms, *slide_ms)?)
            }
        })
    }

    /// Whether panes of this kind are discarded after firing
    pub fn purges_on_fire(&self) -> bool {
        matches!(self, WindowKind::Tumbling { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tumbling_assignment() {
        let windows = TumblingWindows::new(10).unwrap();
        assert_eq!(windows.assign(&(), 0), vec![TimeInterval::new(0, 10)]);
        assert_eq!(windows.assign(&(), 19), vec![TimeInterval::new(10, 20)]);
        assert_eq!(windows.assign(&(), -1), vec![TimeInterval::new(-10, 0)]);
    }

    #[test]
    fn test_tumbling_offset() {
        let windows = TumblingWindows::with_offset(10, 3).unwrap();
        assert_eq!(windows.window_for(2), TimeInterval::new(-7, 3));
        assert_eq!(windows.window_for(3), TimeInterval::new(3, 13));
    }

    #[test]
    fn test_sliding_assignment_ascending() {
        let windows = SlidingWindows::new(10, 5).unwrap();
        let assigned = windows.assign(&(), 12);
        assert_eq!(
            assigned,
            vec![TimeInterval::new(5, 15), TimeInterval::new(10, 20)]
        );
        assert!(assigned.iter().all(|w| w.contains(12)));
    }

    #[test]
    fn test_sliding_uneven_slide() {
        let windows = SlidingWindows::new(10, 3).unwrap();
        let assigned = windows.assign(&(), 9);
        assert_eq!(assigned.len(), 4);
        assert_eq!(assigned[0], TimeInterval::new(0, 10));
        assert_eq!(assigned[3], TimeInterval::new(9, 19));
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(TumblingWindows::new(0).is_err());
        assert!(SlidingWindows::new(10, 0).is_err());
        assert!(SlidingWindows::new(5, 10).is_err());
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        let tumbling = TumblingWindows::new(10).unwrap();
        let lowest = tumbling.window_for(i64::MIN);
        assert_eq!(lowest, TimeInterval::new(i64::MIN, i64::MIN + 10));
        assert!(lowest.contains(i64::MIN));
        let highest = tumbling.window_for(i64::MAX);
        assert_eq!(highest, TimeInterval::new(i64::MAX - 7, i64::MAX));

        let sliding = SlidingWindows::new(10, 5).unwrap();
        assert_eq!(
            sliding.assign(&(), i64::MIN),
            vec![
                TimeInterval::new(i64::MIN, i64::MIN + 3),
                TimeInterval::new(i64::MIN, i64::MIN + 8),
            ]
        );
        assert_eq!(
            sliding.assign(&(), i64::MAX),
            vec![
                TimeInterval::new(i64::MAX - 7, i64::MAX),
                TimeInterval::new(i64::MAX - 2, i64::MAX),
            ]
        );
    }

    #[test]
    fn test_interval_ordering() {
        let mut windows = vec![
            TimeInterval::new(10, 20),
            TimeInterval::new(0, 10),
            TimeInterval::new(0, 5),
        ];
        windows.sort();
        assert_eq!(windows[0], TimeInterval::new(0, 5));
        assert_eq!(windows[2], TimeInterval::new(10, 20));
    }

    #[test]
    fn test_window_kind_from_json() {
        let kind: WindowKind =
            serde_json::from_str(r#"{"type":"sliding","size_ms":60,"slide_ms":20}"#).unwrap();
        assert_eq!(kind, WindowKind::sliding(60, 20));
        assert!(!kind.purges_on_fire());
        assert!(kind.create_assigner::<f64>().is_ok());
    }
}
