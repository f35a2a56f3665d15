//! Pane updaters fold one element into a pane's accumulator

use crate::eviction::ThresholdEviction;
use crate::functions::{CriterionFn, FoldFn, SeedFn};
use paneflow_core::{Result, TimestampMs};
use paneflow_state::{FoldAccumulator, OrderedAccumulator, SequenceAccumulator};

/// Creates and mutates the accumulator of one pane
pub trait PaneUpdater<T, W, A>: Send + Sync {
    /// Accumulator of a pane seen for the first time
    fn seed(&self, window: &W) -> Result<A>;

    /// Add one element to the accumulator
    fn update(&self, window: &W, accumulator: A, value: T, timestamp: TimestampMs) -> Result<A>;
}

/// Folds elements into a single value
pub struct FoldPaneUpdater<W, U, T> {
    seed: SeedFn<W, U>,
    fold: FoldFn<W, U, T>,
}

impl<W, U, T> FoldPaneUpdater<W, U, T> {
    pub fn new(seed: SeedFn<W, U>, fold: FoldFn<W, U, T>) -> Self {
        Self { seed, fold }
    }
}

impl<T, W, U> PaneUpdater<T, W, FoldAccumulator<U>> for FoldPaneUpdater<W, U, T> {
    fn seed(&self, window: &W) -> Result<FoldAccumulator<U>> {
        Ok(FoldAccumulator::new((self.seed)(window)?))
    }

    fn update(
        &self,
        window: &W,
        accumulator: FoldAccumulator<U>,
        value: T,
        _timestamp: TimestampMs,
    ) -> Result<FoldAccumulator<U>> {
        Ok(FoldAccumulator::new((self.fold)(window, accumulator.value, &value)?))
    }
}

/// Appends timestamped elements to a sequence
#[derive(Debug, Clone, Copy, Default)]
pub struct SequencePaneUpdater;

impl<T, W> PaneUpdater<T, W, SequenceAccumulator<T>> for SequencePaneUpdater {
    fn seed(&self, _window: &W) -> Result<SequenceAccumulator<T>> {
        Ok(SequenceAccumulator::new())
    }

    fn update(
        &self,
        _window: &W,
        mut accumulator: SequenceAccumulator<T>,
        value: T,
        timestamp: TimestampMs,
    ) -> Result<SequenceAccumulator<T>> {
        accumulator.push(timestamp, value);
        Ok(accumulator)
    }
}

/// Inserts elements into a map ordered by their eviction criterion
pub struct MapPaneUpdater<T, C> {
    criterion: CriterionFn<T, C>,
}

impl<T, C> MapPaneUpdater<T, C> {
    pub fn new(eviction: &ThresholdEviction<T, C>) -> Self {
        Self {
            criterion: eviction.criterion().clone(),
        }
    }
}

impl<T, W, C> PaneUpdater<T, W, OrderedAccumulator<C, T>> for MapPaneUpdater<T, C>
where
    C: Ord + Clone,
{
    fn seed(&self, _window: &W) -> Result<OrderedAccumulator<C, T>> {
        Ok(OrderedAccumulator::new())
    }

    fn update(
        &self,
        _window: &W,
        mut accumulator: OrderedAccumulator<C, T>,
        value: T,
        timestamp: TimestampMs,
    ) -> Result<OrderedAccumulator<C, T>> {
        let criterion = (self.criterion)(timestamp, &value);
        accumulator.insert(criterion, value);
        Ok(accumulator)
    }
}
