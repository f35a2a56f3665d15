//! Eviction strategies
//!
//! Evictors bound the raw elements retained in a pane. The retention
//! threshold is always derived from the largest criterion seen in the pane
//! itself, never from the clock.

use crate::functions::{CriterionFn, ThresholdFn};
use paneflow_core::{Result, StreamError, TimestampMs};
use paneflow_state::{OrderedAccumulator, SequenceAccumulator};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Threshold-based eviction settings
pub struct ThresholdEviction<T, C> {
    criterion: CriterionFn<T, C>,
    threshold: ThresholdFn<C>,
    assume_ordered: bool,
    criterion_form: String,
}

impl<T, C> Clone for ThresholdEviction<T, C> {
    fn clone(&self) -> Self {
        Self {
            criterion: self.criterion.clone(),
            threshold: self.threshold.clone(),
            assume_ordered: self.assume_ordered,
            criterion_form: self.criterion_form.clone(),
        }
    }
}

impl<T, C> fmt::Debug for ThresholdEviction<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdEviction")
            .field("assume_ordered", &self.assume_ordered)
            .field("criterion_form", &self.criterion_form)
            .finish()
    }
}

impl<T, C> ThresholdEviction<T, C> {
    /// Evict elements whose criterion falls below `threshold(max criterion)`
    pub fn new(
        criterion: impl Fn(TimestampMs, &T) -> C + Send + Sync + 'static,
        threshold: impl Fn(&C) -> C + Send + Sync + 'static,
        criterion_form: impl Into<String>,
    ) -> Self {
        Self {
            criterion: Arc::new(criterion),
            threshold: Arc::new(threshold),
            assume_ordered: false,
            criterion_form: criterion_form.into(),
        }
    }

    /// Trust that elements arrive in non-decreasing criterion order.
    ///
    /// Out-of-order input under this mode is not detected; the evicted set is
    /// then unspecified.
    pub fn assume_ordered(mut self) -> Self {
        self.assume_ordered = true;
        self
    }

    pub fn is_ordered(&self) -> bool {
        self.assume_ordered
    }

    pub fn criterion_form(&self) -> &str {
        &self.criterion_form
    }

    pub fn criterion(&self) -> &CriterionFn<T, C> {
        &self.criterion
    }

    pub fn threshold(&self) -> &ThresholdFn<C> {
        &self.threshold
    }

    pub fn validate(&self) -> Result<()> {
        if self.criterion_form.trim().is_empty() {
            return Err(StreamError::Configuration(
                "eviction criterion form must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl<T: 'static> ThresholdEviction<T, i64> {
    /// Keep elements whose timestamp is within `length_ms` of the newest one
    pub fn by_timestamp(length_ms: i64) -> Self {
        Self::new(|timestamp, _| timestamp, move |max| max.saturating_sub(length_ms), "i64")
    }
}

/// Eviction chosen for a key
#[derive(Debug)]
pub enum EvictionStrategy<T, C> {
    None,
    Threshold(ThresholdEviction<T, C>),
}

impl<T, C> Clone for EvictionStrategy<T, C> {
    fn clone(&self) -> Self {
        match self {
            EvictionStrategy::None => EvictionStrategy::None,
            EvictionStrategy::Threshold(threshold) => EvictionStrategy::Threshold(threshold.clone()),
        }
    }
}

/// Trims a pane's accumulator after each update
pub trait Evictor<W, A>: Send + Sync {
    /// Returns the number of evicted elements
    fn evict(&self, window: &W, accumulator: &mut A) -> usize;
}

/// Never evicts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEvictor;

impl<W, A> Evictor<W, A> for NoOpEvictor {
    fn evict(&self, _window: &W, _accumulator: &mut A) -> usize {
        0
    }
}

/// Pops elements from the head of a sequence while they violate the threshold
pub struct SequenceThresholdEvictor<T, C> {
    criterion: CriterionFn<T, C>,
    threshold: ThresholdFn<C>,
    assume_ordered: bool,
}

impl<T, C> SequenceThresholdEvictor<T, C> {
    pub fn new(eviction: &ThresholdEviction<T, C>) -> Self {
        Self {
            criterion: eviction.criterion.clone(),
            threshold: eviction.threshold.clone(),
            assume_ordered: eviction.assume_ordered,
        }
    }
}

impl<W, T, C> Evictor<W, SequenceAccumulator<T>> for SequenceThresholdEvictor<T, C>
where
    T: Send + Sync,
    C: Ord,
{
    fn evict(&self, _window: &W, sequence: &mut SequenceAccumulator<T>) -> usize {
        let max = if self.assume_ordered {
            sequence
                .back()
                .map(|item| (self.criterion)(item.timestamp, &item.value))
        } else {
            sequence
                .iter()
                .map(|item| (self.criterion)(item.timestamp, &item.value))
                .max()
        };
        let Some(max) = max else {
            return 0;
        };
        let cutoff = (self.threshold)(&max);

        let mut evicted = 0;
        while let Some(head) = sequence.front() {
            if (self.criterion)(head.timestamp, &head.value) >= cutoff {
                break;
            }
            sequence.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            trace!("Evicted {} elements from sequence", evicted);
        }
        evicted
    }
}

/// Pops the smallest entries of an ordered map while they violate the threshold
pub struct MapThresholdEvictor<C> {
    threshold: ThresholdFn<C>,
}

impl<C> MapThresholdEvictor<C> {
    pub fn new<T>(eviction: &ThresholdEviction<T, C>) -> Self {
        Self {
            threshold: eviction.threshold.clone(),
        }
    }
}

impl<W, C, T> Evictor<W, OrderedAccumulator<C, T>> for MapThresholdEvictor<C>
where
    C: Ord + Clone,
{
    fn evict(&self, _window: &W, entries: &mut OrderedAccumulator<C, T>) -> usize {
        let Some(max) = entries.last_key().map(|key| key.criterion.clone()) else {
            return 0;
        };
        let cutoff = (self.threshold)(&max);

        let mut evicted = 0;
        while entries
            .first_key()
            .is_some_and(|key| key.criterion < cutoff)
        {
            entries.pop_first();
            evicted += 1;
        }
        if evicted > 0 {
            trace!("Evicted {} entries from ordered map", evicted);
        }
        evicted
    }
}
