//! Keyed window engine
//!
//! The engine dispatches keyed deltas to one lane per key. A lane is created
//! lazily on the first update of its key and owns the key's pane manager and
//! armed trigger timers behind a mutex, so a key only ever has one active
//! mutator while distinct keys proceed in parallel. Emissions are published
//! downstream after the lane lock is released.

use crate::schedule::{delay_until, Scheduler, TimerHandle};
use crate::source::{DeltaSink, DeltaSource, Junction};
use crate::spec::WindowSpec;
use crate::stats::EngineStats;
use crate::timestamps::TimestampAssigner;
use dashmap::DashMap;
use paneflow_core::{Data, Delta, KeyData, Result, StreamError, TimestampMs, Windowed};
use paneflow_state::{Discriminator, SetCell, StateTag};
use paneflow_windows::{PaneManager, Trigger};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

type ManagerFactory<K, T, W, U> =
    Box<dyn Fn(&K) -> Result<Box<dyn PaneManager<T, W, U>>> + Send + Sync>;

/// A failure reported on the engine's failure channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure<K> {
    pub key: K,
    pub message: String,
    /// True when persisted state of the key may have diverged
    pub persistence: bool,
}

struct KeyLane<T, W, U> {
    manager: Box<dyn PaneManager<T, W, U>>,
    timers: BTreeMap<W, (TimestampMs, TimerHandle)>,
}

impl<T, W: Ord, U> KeyLane<T, W, U> {
    fn new(manager: Box<dyn PaneManager<T, W, U>>) -> Self {
        Self {
            manager,
            timers: BTreeMap::new(),
        }
    }

    fn cancel_timers(&mut self) {
        for (_, (_, handle)) in std::mem::take(&mut self.timers) {
            handle.cancel();
        }
    }
}

struct EngineInner<K, T, W, U> {
    stream_id: String,
    factory: ManagerFactory<K, T, W, U>,
    timestamps: TimestampAssigner<T>,
    scheduler: Arc<dyn Scheduler>,
    lanes: DashMap<K, Arc<Mutex<KeyLane<T, W, U>>>>,
    keys: Option<SetCell<K>>,
    output: Junction<K, Windowed<W, U>>,
    failures: Mutex<Vec<mpsc::UnboundedSender<EngineFailure<K>>>>,
    stats: EngineStats,
}

/// Incremental keyed window aggregation over a delta stream
pub struct KeyedWindowEngine<K, T, W, U> {
    inner: Arc<EngineInner<K, T, W, U>>,
}

impl<K, T, W, U> Clone for KeyedWindowEngine<K, T, W, U> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T, W, U> KeyedWindowEngine<K, T, W, U>
where
    K: KeyData,
    T: Data,
    W: Data + Ord,
    U: Data,
{
    /// Validate `spec` and start the engine.
    ///
    /// A durable engine restores every persisted key, its open panes, and the
    /// trigger timers of those panes.
    pub fn new<G, C>(spec: WindowSpec<K, T, W, U, G, C>, scheduler: Arc<dyn Scheduler>) -> Result<Self>
    where
        G: Trigger<T, W> + 'static,
        C: Data + Ord,
    {
        spec.validate()?;
        let stream_id = spec.stream_id().to_string();
        let timestamps = spec.timestamps().clone();
        let keys = match spec.persistence() {
            Some(persistence) => Some(SetCell::new(
                persistence.clone(),
                StateTag::stream(&stream_id, Discriminator::Keys)?,
            )),
            None => None,
        };

        let inner = Arc::new(EngineInner {
            stream_id,
            factory: Box::new(move |key: &K| spec.create_manager(key)),
            timestamps,
            scheduler,
            lanes: DashMap::new(),
            keys,
            output: Junction::new(),
            failures: Mutex::new(Vec::new()),
            stats: EngineStats::new(),
        });
        inner.restore()?;
        info!(
            "Started window engine '{}' ({} restored keys)",
            inner.stream_id,
            inner.lanes.len()
        );
        Ok(Self { inner })
    }

    /// Apply one delta: updates feed the key's panes, removes tear the key down
    pub fn on_delta(&self, delta: Delta<K, T>) -> Result<()> {
        match delta {
            Delta::Update { key, value } => self.inner.on_update(key, value),
            Delta::Remove { key } => self.inner.on_remove(key),
        }
    }

    /// Receive a copy of every failure from now on
    pub fn subscribe_failures(&self) -> mpsc::UnboundedReceiver<EngineFailure<K>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.failures.lock().push(tx);
        rx
    }

    /// Keys with a live lane
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .lanes
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Open windows of `key`
    pub fn open_windows(&self, key: &K) -> Vec<W> {
        match self.inner.lane(key) {
            Some(lane) => lane.lock().manager.open_windows(),
            None => Vec::new(),
        }
    }

    /// Number of trigger timers currently armed across all keys
    pub fn armed_timers(&self) -> usize {
        self.inner
            .lanes
            .iter()
            .map(|entry| entry.value().lock().timers.len())
            .sum()
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn stats(&self) -> &EngineStats {
        &self.inner.stats
    }

    /// Cancel every timer and drop all lanes from memory; persisted state is kept
    pub fn close(&self) {
        let lanes: Vec<_> = self
            .inner
            .lanes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.lanes.clear();
        for lane in lanes {
            lane.lock().cancel_timers();
        }
        info!("Closed window engine '{}'", self.inner.stream_id);
    }
}

impl<K, T, W, U> EngineInner<K, T, W, U>
where
    K: KeyData,
    T: Data,
    W: Data + Ord,
    U: Data,
{
    fn lane(&self, key: &K) -> Option<Arc<Mutex<KeyLane<T, W, U>>>> {
        self.lanes.get(key).map(|entry| entry.value().clone())
    }

    /// Existing lane of `key`, or a new one registered atomically
    fn lane_or_create(&self, key: &K) -> Result<Arc<Mutex<KeyLane<T, W, U>>>> {
        if let Some(lane) = self.lane(key) {
            return Ok(lane);
        }
        let candidate = Arc::new(Mutex::new(KeyLane::new((self.factory)(key)?)));
        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| candidate.clone())
            .value()
            .clone();
        if Arc::ptr_eq(&lane, &candidate) {
            if let Some(keys) = &self.keys {
                if let Err(err) = keys.add(key) {
                    self.lanes.remove(key);
                    return Err(err);
                }
            }
            self.stats.record_lane_created();
            debug!("Created lane for key {:?} in '{}'", key, self.stream_id);
        }
        Ok(lane)
    }

    fn restore(self: &Arc<Self>) -> Result<()> {
        let Some(keys) = &self.keys else {
            return Ok(());
        };
        for key in keys.iter()? {
            let lane = Arc::new(Mutex::new(KeyLane::new((self.factory)(&key)?)));
            {
                let mut guard = lane.lock();
                self.sync_timers(&key, &mut guard);
            }
            self.lanes.insert(key, lane);
            self.stats.record_lane_created();
        }
        Ok(())
    }

    fn on_update(self: &Arc<Self>, key: K, value: T) -> Result<()> {
        self.stats.record_event();
        let lane = match self.lane_or_create(&key) {
            Ok(lane) => lane,
            Err(err) => {
                self.report(&key, &err);
                return Err(err);
            }
        };
        let timestamp = self.timestamps.assign(&value, self.scheduler.as_ref());
        let now = self.scheduler.now();

        let outcome = {
            let mut guard = lane.lock();
            let outcome = guard.manager.on_event(value, timestamp, now);
            self.sync_timers(&key, &mut guard);
            outcome
        };

        for (window, value) in outcome.emissions {
            self.publish(Delta::update(key.clone(), Windowed::new(window, value)));
        }
        match outcome.failure {
            None => Ok(()),
            Some(err) => {
                self.report(&key, &err);
                Err(err)
            }
        }
    }

    fn on_remove(&self, key: K) -> Result<()> {
        self.stats.record_remove();
        let mut outcome = Ok(());
        if let Some((_, lane)) = self.lanes.remove(&key) {
            {
                let mut guard = lane.lock();
                guard.cancel_timers();
                outcome = guard.manager.clear();
            }
            if let Some(keys) = &self.keys {
                let removed = keys.remove(&key);
                if outcome.is_ok() {
                    outcome = removed;
                }
            }
            self.stats.record_lane_removed();
            debug!("Removed lane for key {:?} in '{}'", key, self.stream_id);
        }
        if let Err(err) = &outcome {
            self.report(&key, err);
        }
        self.publish(Delta::remove(key));
        outcome
    }

    fn on_timer(self: &Arc<Self>, key: K, window: W, deadline: TimestampMs) {
        let Some(lane) = self.lane(&key) else {
            return;
        };
        let result = {
            let mut guard = lane.lock();
            let armed = guard.timers.get(&window).map(|(armed, _)| *armed);
            if armed != Some(deadline) {
                return;
            }
            guard.timers.remove(&window);
            self.stats.record_timer_fire();
            let result = guard.manager.on_timer(&window, self.scheduler.now());
            self.sync_timers(&key, &mut guard);
            result
        };

        match result {
            Ok(Some(value)) => self.publish(Delta::update(key, Windowed::new(window, value))),
            Ok(None) => {}
            Err(err) => self.report(&key, &err),
        }
    }

    /// Make the armed timers of a lane match the manager's deadlines
    fn sync_timers(self: &Arc<Self>, key: &K, lane: &mut KeyLane<T, W, U>) {
        let deadlines: BTreeMap<W, TimestampMs> = lane.manager.deadlines().into_iter().collect();
        lane.timers.retain(|window, (armed, handle)| {
            let keep = deadlines.get(window) == Some(&*armed);
            if !keep {
                handle.cancel();
            }
            keep
        });
        for (window, deadline) in deadlines {
            if lane.timers.contains_key(&window) {
                continue;
            }
            let handle = self.arm(key.clone(), window.clone(), deadline);
            lane.timers.insert(window, (deadline, handle));
        }
    }

    fn arm(self: &Arc<Self>, key: K, window: W, deadline: TimestampMs) -> TimerHandle {
        let delay = delay_until(self.scheduler.now(), deadline);
        let engine: Weak<Self> = Arc::downgrade(self);
        self.scheduler.arm(
            delay,
            Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.on_timer(key, window, deadline);
                }
            }),
        )
    }

    fn publish(&self, delta: Delta<K, Windowed<W, U>>) {
        if delta.value().is_some() {
            self.stats.record_emission();
        }
        if let Err(err) = self.output.publish(delta) {
            warn!("Downstream of '{}' rejected an emission: {}", self.stream_id, err);
        }
    }

    fn report(&self, key: &K, err: &StreamError) {
        error!("Window engine '{}' failed for key {:?}: {}", self.stream_id, key, err);
        self.stats.record_failure();
        let failure = EngineFailure {
            key: key.clone(),
            message: err.to_string(),
            persistence: err.is_persistence(),
        };
        self.failures
            .lock()
            .retain(|tx| tx.send(failure.clone()).is_ok());
    }
}

impl<K, T, W, U> DeltaSink<K, T> for KeyedWindowEngine<K, T, W, U>
where
    K: KeyData,
    T: Data,
    W: Data + Ord,
    U: Data,
{
    fn accept(&self, delta: Delta<K, T>) -> Result<()> {
        self.on_delta(delta)
    }
}

impl<K, T, W, U> DeltaSource<K, Windowed<W, U>> for KeyedWindowEngine<K, T, W, U>
where
    K: KeyData,
    T: Data,
    W: Data + Ord,
    U: Data,
{
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, Windowed<W, U>>>) {
        self.inner.output.subscribe(sink);
    }
}
