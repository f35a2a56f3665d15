//! Pane management for a single key
//!
//! The pane manager assigns each element to its windows, updates and trims
//! the affected accumulators, and consults the trigger. Timer callbacks
//! re-enter trigger evaluation for one window through [`PaneManager::on_timer`].
//!
//! Any failure while handling a window tears that pane down so the next
//! element re-seeds it. The element's other windows are still handled.

use crate::evaluator::PaneEvaluator;
use crate::eviction::Evictor;
use crate::trigger::{Trigger, TriggerAction};
use crate::updater::PaneUpdater;
use crate::window::WindowAssigner;
use paneflow_core::{Data, Result, StreamError, TimestampMs};
use paneflow_state::{AccumulatorStore, PaneAccumulator, TransientAccumulators, WindowStates};
use tracing::{debug, warn};

/// Result of handling one element across all of its windows.
///
/// Windows that succeeded keep their emissions when another window of the
/// same element fails.
#[derive(Debug)]
pub struct EventOutcome<W, U> {
    pub emissions: Vec<(W, U)>,
    /// First failure among the element's windows
    pub failure: Option<StreamError>,
}

impl<W, U> EventOutcome<W, U> {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    /// Emissions when every window succeeded, otherwise the first failure
    pub fn into_result(self) -> Result<Vec<(W, U)>> {
        match self.failure {
            None => Ok(self.emissions),
            Some(err) => Err(err),
        }
    }
}

/// Per-key window aggregation
pub trait PaneManager<T, W, U>: Send {
    /// Handle one element in every window it belongs to
    fn on_event(&mut self, value: T, timestamp: TimestampMs, now: TimestampMs) -> EventOutcome<W, U>;

    /// Re-evaluate the trigger of `window` at scheduler time `now`
    fn on_timer(&mut self, window: &W, now: TimestampMs) -> Result<Option<U>>;

    /// Next timer deadline of every open window that has one
    fn deadlines(&self) -> Vec<(W, TimestampMs)>;

    /// Open windows in ascending order
    fn open_windows(&self) -> Vec<W>;

    /// Drop every pane of the key
    fn clear(&mut self) -> Result<()>;
}

/// Pane manager assembled from pluggable components
pub struct DefaultPaneManager<T, W, S, A, U> {
    assigner: Box<dyn WindowAssigner<T, W>>,
    trigger: Box<dyn Trigger<T, W, State = S>>,
    updater: Box<dyn PaneUpdater<T, W, A>>,
    evictor: Box<dyn Evictor<W, A>>,
    evaluator: Box<dyn PaneEvaluator<W, A, U>>,
    accumulators: Box<dyn AccumulatorStore<W, A>>,
    states: WindowStates<W, S>,
}

impl<T, W, S, A, U> DefaultPaneManager<T, W, S, A, U>
where
    T: Data,
    W: Data + Ord,
    S: Data,
    A: PaneAccumulator,
    U: Send + 'static,
{
    /// Create a manager with in-memory stores
    pub fn new(
        assigner: Box<dyn WindowAssigner<T, W>>,
        trigger: Box<dyn Trigger<T, W, State = S>>,
        updater: Box<dyn PaneUpdater<T, W, A>>,
        evictor: Box<dyn Evictor<W, A>>,
        evaluator: Box<dyn PaneEvaluator<W, A, U>>,
    ) -> Self {
        Self {
            assigner,
            trigger,
            updater,
            evictor,
            evaluator,
            accumulators: Box::new(TransientAccumulators::new()),
            states: WindowStates::transient(),
        }
    }

    /// Keep accumulators in the given store
    pub fn with_accumulators(mut self, accumulators: Box<dyn AccumulatorStore<W, A>>) -> Self {
        self.accumulators = accumulators;
        self
    }

    /// Keep trigger state in the given store
    pub fn with_window_states(mut self, states: WindowStates<W, S>) -> Self {
        self.states = states;
        self
    }

    pub fn is_durable(&self) -> bool {
        self.accumulators.is_durable()
    }

    fn update_pane(
        &mut self,
        window: &W,
        value: T,
        timestamp: TimestampMs,
        now: TimestampMs,
    ) -> Result<Option<U>> {
        let (accumulator, mut state) = match self.states.get(window).cloned() {
            Some(state) => match self.accumulators.take(window)? {
                Some(accumulator) => (accumulator, state),
                None => {
                    warn!("Pane {:?} lost its accumulator, re-seeding", window);
                    (self.updater.seed(window)?, state)
                }
            },
            None => {
                debug!("Seeding pane {:?}", window);
                (self.updater.seed(window)?, self.trigger.init(window, now))
            }
        };

        let action = self
            .trigger
            .on_element(window, &mut state, &value, timestamp)?;
        let mut accumulator = self
            .updater
            .update(window, accumulator, value, timestamp)?;
        self.evictor.evict(window, &mut accumulator);
        self.apply(window, accumulator, state, action)
    }

    fn apply(&mut self, window: &W, accumulator: A, state: S, action: TriggerAction) -> Result<Option<U>> {
        let emission = if action.fires() {
            Some(self.evaluator.evaluate(window, &accumulator)?)
        } else {
            None
        };

        if action.purges() {
            self.accumulators.remove(window)?;
            self.states.remove(window)?;
            debug!("Purged pane {:?}", window);
        } else {
            self.accumulators.put(window.clone(), accumulator)?;
            self.states.put(window.clone(), state)?;
        }
        Ok(emission)
    }

    fn fire_timer(&mut self, window: &W, now: TimestampMs) -> Result<Option<U>> {
        let Some(mut state) = self.states.get(window).cloned() else {
            return Ok(None);
        };
        let action = self.trigger.on_timer(window, &mut state, now)?;
        if action == TriggerAction::Continue {
            self.states.put(window.clone(), state)?;
            return Ok(None);
        }

        let accumulator = match self.accumulators.take(window)? {
            Some(accumulator) => accumulator,
            None => self.updater.seed(window)?,
        };
        self.apply(window, accumulator, state, action)
    }

    fn teardown(&mut self, window: &W, cause: &StreamError) {
        warn!("Tearing down pane {:?}: {}", window, cause);
        if let Err(err) = self.accumulators.remove(window) {
            warn!("Failed to remove accumulator of {:?}: {}", window, err);
        }
        if let Err(err) = self.states.remove(window) {
            warn!("Failed to remove window state of {:?}: {}", window, err);
        }
    }

    fn corrupted(window: &W, err: StreamError) -> StreamError {
        if err.is_persistence() && !matches!(err, StreamError::PaneCorrupted { .. }) {
            StreamError::PaneCorrupted {
                window: format!("{:?}", window),
                reason: err.to_string(),
            }
        } else {
            err
        }
    }
}

impl<T, W, S, A, U> PaneManager<T, W, U> for DefaultPaneManager<T, W, S, A, U>
where
    T: Data,
    W: Data + Ord,
    S: Data,
    A: PaneAccumulator,
    U: Send + 'static,
{
    fn on_event(&mut self, value: T, timestamp: TimestampMs, now: TimestampMs) -> EventOutcome<W, U> {
        let windows = self.assigner.assign(&value, timestamp);
        let mut outcome = EventOutcome {
            emissions: Vec::new(),
            failure: None,
        };
        for window in windows {
            match self.update_pane(&window, value.clone(), timestamp, now) {
                Ok(Some(emission)) => outcome.emissions.push((window, emission)),
                Ok(None) => {}
                Err(err) => {
                    self.teardown(&window, &err);
                    let err = Self::corrupted(&window, err);
                    if outcome.failure.is_none() {
                        outcome.failure = Some(err);
                    }
                }
            }
        }
        outcome
    }

    fn on_timer(&mut self, window: &W, now: TimestampMs) -> Result<Option<U>> {
        self.fire_timer(window, now).map_err(|err| {
            self.teardown(window, &err);
            Self::corrupted(window, err)
        })
    }

    fn deadlines(&self) -> Vec<(W, TimestampMs)> {
        self.states
            .iter()
            .filter_map(|(window, state)| {
                self.trigger
                    .deadline(window, state)
                    .map(|deadline| (window.clone(), deadline))
            })
            .collect()
    }

    fn open_windows(&self) -> Vec<W> {
        self.states.windows().cloned().collect()
    }

    fn clear(&mut self) -> Result<()> {
        for window in self.open_windows() {
            self.accumulators.remove(&window)?;
        }
        self.states.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{FoldingEvaluator, IdentityEvaluator, ReducingEvaluator};
    use crate::eviction::{MapThresholdEvictor, NoOpEvictor, SequenceThresholdEvictor, ThresholdEviction};
    use crate::functions::{combine_fn, fold_fn, seed_fn, try_fold_fn};
    use crate::trigger::{CountTrigger, EndOfWindowTrigger, PeriodicTrigger};
    use crate::updater::{FoldPaneUpdater, MapPaneUpdater, SequencePaneUpdater};
    use crate::window::{GlobalWindow, GlobalWindows, SlidingWindows, TimeInterval, TumblingWindows};
    use paneflow_state::{
        Discriminator, DurableAccumulators, FoldAccumulator, MemoryPersistence, OrderedAccumulator,
        PersistenceProvider, SequenceAccumulator, StateForms, StateTag,
    };
    use std::sync::Arc;

    fn fold_manager<W, S>(
        assigner: impl WindowAssigner<i64, W> + 'static,
        trigger: impl Trigger<i64, W, State = S> + 'static,
    ) -> DefaultPaneManager<i64, W, S, FoldAccumulator<i64>, i64>
    where
        W: Data + Ord,
        S: Data,
    {
        // Not associative: order of application is observable.
        let updater = FoldPaneUpdater::new(seed_fn(|_| 1), fold_fn(|_, acc: i64, v: &i64| acc * 3 + v));
        DefaultPaneManager::new(
            Box::new(assigner),
            Box::new(trigger),
            Box::new(updater),
            Box::new(NoOpEvictor),
            Box::new(IdentityEvaluator),
        )
    }

    fn sum_sequence_manager(
        eviction: ThresholdEviction<i64, i64>,
    ) -> impl PaneManager<i64, GlobalWindow, i64> {
        let seed = seed_fn(|_: &GlobalWindow| 0i64);
        let fold = fold_fn(|_: &GlobalWindow, acc: i64, v: &i64| acc + v);
        DefaultPaneManager::<i64, GlobalWindow, u64, SequenceAccumulator<i64>, i64>::new(
            Box::new(GlobalWindows),
            Box::new(CountTrigger::new(1).unwrap()),
            Box::new(SequencePaneUpdater),
            Box::new(SequenceThresholdEvictor::new(&eviction)),
            Box::new(FoldingEvaluator::new(seed, fold)),
        )
    }

    fn sum_map_manager(eviction: ThresholdEviction<i64, i64>) -> impl PaneManager<i64, GlobalWindow, i64> {
        let seed = seed_fn(|_: &GlobalWindow| 0i64);
        let fold = fold_fn(|_: &GlobalWindow, acc: i64, v: &i64| acc + v);
        let combine = combine_fn(|_: &GlobalWindow, a: i64, b: i64| a + b);
        DefaultPaneManager::<i64, GlobalWindow, u64, OrderedAccumulator<i64, i64>, i64>::new(
            Box::new(GlobalWindows),
            Box::new(CountTrigger::new(1).unwrap()),
            Box::new(MapPaneUpdater::new(&eviction)),
            Box::new(MapThresholdEvictor::new(&eviction)),
            Box::new(ReducingEvaluator::new(seed, fold, combine)),
        )
    }

    fn left_fold(values: &[i64]) -> i64 {
        values.iter().fold(1, |acc, v| acc * 3 + v)
    }

    #[test]
    fn test_fold_equals_left_fold_for_any_firing_cadence() {
        let values = [4, -2, 7, 0, 9, 1, 3];
        for every in 1..=4u64 {
            let mut manager = fold_manager(GlobalWindows, CountTrigger::new(every).unwrap());
            for (i, v) in values.iter().enumerate() {
                let emissions = manager.on_event(*v, i as i64, i as i64).into_result().unwrap();
                if (i as u64 + 1) % every == 0 {
                    assert_eq!(emissions, vec![(GlobalWindow, left_fold(&values[..=i]))]);
                } else {
                    assert!(emissions.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_reducing_matches_survivors_after_eviction() {
        // (timestamp, value), arriving out of timestamp order.
        let events = [(5, 1), (2, 10), (9, 100), (3, 1_000), (14, 10_000), (12, 100_000)];
        for length in [0, 2, 4, 7, 20] {
            let mut manager = sum_map_manager(ThresholdEviction::by_timestamp(length));
            let mut max_seen = i64::MIN;
            for (i, (ts, v)) in events.iter().enumerate() {
                max_seen = max_seen.max(*ts);
                let cutoff = max_seen - length;
                let expected: i64 = events[..=i]
                    .iter()
                    .filter(|(t, _)| *t >= cutoff)
                    .map(|(_, v)| v)
                    .sum();
                let emissions = manager.on_event(*v, *ts, *ts).into_result().unwrap();
                assert_eq!(emissions, vec![(GlobalWindow, expected)], "length {}", length);
            }
        }
    }

    #[test]
    fn test_sequence_and_map_agree_without_eviction() {
        let events = [(3, 2), (1, 5), (8, -4), (8, 6), (2, 11)];
        let mut sequence = sum_sequence_manager(ThresholdEviction::by_timestamp(1_000));
        let mut map = sum_map_manager(ThresholdEviction::by_timestamp(1_000));
        for (ts, v) in events {
            assert_eq!(
                sequence.on_event(v, ts, ts).into_result().unwrap(),
                map.on_event(v, ts, ts).into_result().unwrap()
            );
        }
    }

    #[test]
    fn test_tumbling_end_of_window_purges() {
        let mut manager = fold_manager(TumblingWindows::new(10).unwrap(), EndOfWindowTrigger);
        assert!(manager.on_event(2, 1, 1).into_result().unwrap().is_empty());
        assert!(manager.on_event(5, 4, 4).into_result().unwrap().is_empty());
        assert!(manager.on_event(7, 12, 12).into_result().unwrap().is_empty());

        let deadlines = manager.deadlines();
        assert_eq!(
            deadlines,
            vec![(TimeInterval::new(0, 10), 10), (TimeInterval::new(10, 20), 20)]
        );

        let window = TimeInterval::new(0, 10);
        assert_eq!(manager.on_timer(&window, 9).unwrap(), None);
        assert_eq!(manager.on_timer(&window, 10).unwrap(), Some(left_fold(&[2, 5])));
        assert_eq!(manager.open_windows(), vec![TimeInterval::new(10, 20)]);

        // A new element for the purged window starts from the seed again.
        manager.on_event(3, 5, 13).into_result().unwrap();
        assert_eq!(manager.on_timer(&window, 13).unwrap(), Some(left_fold(&[3])));
    }

    #[test]
    fn test_sliding_panes_survive_firing() {
        let mut manager = fold_manager(
            SlidingWindows::new(10, 5).unwrap(),
            PeriodicTrigger::new(4).unwrap(),
        );
        manager.on_event(1, 6, 0).into_result().unwrap();
        assert_eq!(
            manager.open_windows(),
            vec![TimeInterval::new(0, 10), TimeInterval::new(5, 15)]
        );

        let window = TimeInterval::new(5, 15);
        assert_eq!(manager.on_timer(&window, 4).unwrap(), Some(left_fold(&[1])));
        manager.on_event(2, 7, 5).into_result().unwrap();
        assert_eq!(manager.on_timer(&window, 8).unwrap(), Some(left_fold(&[1, 2])));
        assert!(manager.open_windows().contains(&window));
    }

    #[test]
    fn test_user_failure_tears_down_pane() {
        let updater = FoldPaneUpdater::new(
            seed_fn(|_: &GlobalWindow| 0i64),
            try_fold_fn(|_: &GlobalWindow, acc: i64, v: &i64| {
                if *v < 0 {
                    Err(StreamError::user("negative input"))
                } else {
                    Ok(acc + v)
                }
            }),
        );
        let mut manager = DefaultPaneManager::<i64, GlobalWindow, u64, FoldAccumulator<i64>, i64>::new(
            Box::new(GlobalWindows),
            Box::new(CountTrigger::new(1).unwrap()),
            Box::new(updater),
            Box::new(NoOpEvictor),
            Box::new(IdentityEvaluator),
        );

        manager.on_event(5, 0, 0).into_result().unwrap();
        let err = manager.on_event(-1, 1, 1).into_result().unwrap_err();
        assert!(matches!(err, StreamError::UserFunction(_)));
        assert!(manager.open_windows().is_empty());

        assert_eq!(manager.on_event(2, 2, 2).into_result().unwrap(), vec![(GlobalWindow, 2)]);
    }

    #[test]
    fn test_failing_window_keeps_other_emissions() {
        let updater = FoldPaneUpdater::new(
            seed_fn(|_: &TimeInterval| 0i64),
            try_fold_fn(|window: &TimeInterval, acc: i64, v: &i64| {
                if window.start == 5 {
                    Err(StreamError::user("rejected window"))
                } else {
                    Ok(acc + v)
                }
            }),
        );
        let mut manager = DefaultPaneManager::<i64, TimeInterval, u64, FoldAccumulator<i64>, i64>::new(
            Box::new(SlidingWindows::new(10, 5).unwrap()),
            Box::new(CountTrigger::new(1).unwrap().purging()),
            Box::new(updater),
            Box::new(NoOpEvictor),
            Box::new(IdentityEvaluator),
        );

        let outcome = manager.on_event(7, 6, 6);
        assert!(!outcome.is_ok());
        assert_eq!(outcome.emissions, vec![(TimeInterval::new(0, 10), 7)]);
        assert!(matches!(outcome.failure, Some(StreamError::UserFunction(_))));
        assert!(manager.open_windows().is_empty());

        // Windows after the failing one are still handled.
        let outcome = manager.on_event(3, 12, 12);
        assert_eq!(outcome.emissions, vec![(TimeInterval::new(10, 20), 3)]);
        assert!(outcome.failure.is_some());
    }

    fn durable_fold_manager(
        provider: Arc<dyn PersistenceProvider>,
    ) -> DefaultPaneManager<i64, TimeInterval, (), FoldAccumulator<i64>, i64> {
        let forms = StateForms::new("interval", "i64");
        let base = StateTag::keyed("panes", &"k", Discriminator::Value, &forms).unwrap();
        let windows = StateTag::keyed("panes", &"k", Discriminator::WindowState, &forms).unwrap();
        fold_manager(TumblingWindows::new(10).unwrap(), EndOfWindowTrigger)
            .with_accumulators(Box::new(DurableAccumulators::new(provider.clone(), base)))
            .with_window_states(WindowStates::durable(provider, windows).unwrap())
    }

    #[test]
    fn test_durable_manager_resumes() {
        let provider: Arc<dyn PersistenceProvider> = Arc::new(MemoryPersistence::new());
        let window = TimeInterval::new(0, 10);

        let mut first = durable_fold_manager(provider.clone());
        assert!(first.is_durable());
        first.on_event(4, 1, 1).into_result().unwrap();
        first.on_event(6, 2, 2).into_result().unwrap();
        drop(first);

        let mut resumed = durable_fold_manager(provider);
        assert_eq!(resumed.open_windows(), vec![window]);
        resumed.on_event(8, 3, 3).into_result().unwrap();
        assert_eq!(resumed.on_timer(&window, 10).unwrap(), Some(left_fold(&[4, 6, 8])));
    }

    #[test]
    fn test_persistence_failure_reports_corrupted_pane() {
        let memory = Arc::new(MemoryPersistence::new());
        let mut manager = durable_fold_manager(memory.clone());
        manager.on_event(4, 1, 1).into_result().unwrap();

        memory.set_reject_writes(true);
        let err = manager.on_event(6, 2, 2).into_result().unwrap_err();
        assert!(matches!(err, StreamError::PaneCorrupted { .. }));
        assert!(manager.open_windows().is_empty());

        memory.set_reject_writes(false);
        manager.on_event(9, 3, 3).into_result().unwrap();
        assert_eq!(
            manager.on_timer(&TimeInterval::new(0, 10), 10).unwrap(),
            Some(left_fold(&[9]))
        );
    }

    #[test]
    fn test_clear_drops_all_panes() {
        let mut manager = fold_manager(SlidingWindows::new(10, 5).unwrap(), EndOfWindowTrigger);
        manager.on_event(1, 7, 7).into_result().unwrap();
        assert_eq!(manager.open_windows().len(), 2);
        manager.clear().unwrap();
        assert!(manager.open_windows().is_empty());
        assert!(manager.deadlines().is_empty());
    }
}
