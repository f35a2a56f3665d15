//! Map stream connectors
//!
//! [`ModalFilter`] filters a keyed stream with a predicate parameterised by a
//! mode that arrives on a second stream. [`KeysCollector`] turns a keyed
//! stream into a stream of its current key set.

use crate::source::{DeltaSink, DeltaSource, Junction};
use paneflow_core::{Data, Delta, KeyData, Result};
use paneflow_state::{Discriminator, PersistenceProvider, StateTag, ValueCell};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub type ModePredicate<K, V, M> = Arc<dyn Fn(&M, &K, &V) -> bool + Send + Sync>;

struct ModalState<K, V, M> {
    mode: M,
    values: HashMap<K, V>,
    passing: HashSet<K>,
}

struct ModalInner<K, V, M> {
    stream_id: String,
    predicate: ModePredicate<K, V, M>,
    cell: Option<ValueCell<M>>,
    state: Mutex<ModalState<K, V, M>>,
    output: Junction<K, V>,
}

/// Keyed filter whose predicate depends on a mode.
///
/// Downstream sees the filtered view of the input map: a key that stops
/// passing, whether through its own update or a mode change, is removed.
pub struct ModalFilter<K, V, M> {
    inner: Arc<ModalInner<K, V, M>>,
}

impl<K, V, M> Clone for ModalFilter<K, V, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: KeyData, V: Data, M: Data> ModalFilter<K, V, M> {
    pub fn new(
        stream_id: impl Into<String>,
        initial: M,
        predicate: impl Fn(&M, &K, &V) -> bool + Send + Sync + 'static,
    ) -> Result<Self> {
        let stream_id = stream_id.into();
        StateTag::stream(&stream_id, Discriminator::Mode)?;
        Ok(Self::build(stream_id, initial, Arc::new(predicate), None))
    }

    /// A filter whose mode survives restarts; the persisted mode wins over `initial`
    pub fn durable(
        stream_id: impl Into<String>,
        initial: M,
        predicate: impl Fn(&M, &K, &V) -> bool + Send + Sync + 'static,
        persistence: Arc<dyn PersistenceProvider>,
    ) -> Result<Self> {
        let stream_id = stream_id.into();
        let cell = ValueCell::new(
            persistence,
            StateTag::stream(&stream_id, Discriminator::Mode)?,
            initial,
        );
        let mode = cell.get()?;
        Ok(Self::build(stream_id, mode, Arc::new(predicate), Some(cell)))
    }

    fn build(
        stream_id: String,
        mode: M,
        predicate: ModePredicate<K, V, M>,
        cell: Option<ValueCell<M>>,
    ) -> Self {
        Self {
            inner: Arc::new(ModalInner {
                stream_id,
                predicate,
                cell,
                state: Mutex::new(ModalState {
                    mode,
                    values: HashMap::new(),
                    passing: HashSet::new(),
                }),
                output: Junction::new(),
            }),
        }
    }

    pub fn mode(&self) -> M {
        self.inner.state.lock().mode.clone()
    }

    /// Switch the mode and re-filter every known key
    pub fn set_mode(&self, mode: M) -> Result<()> {
        if let Some(cell) = &self.inner.cell {
            cell.set(&mode)?;
        }
        let emissions = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.mode = mode;
            let mut emissions = Vec::new();
            for (key, value) in &state.values {
                let passes = (self.inner.predicate)(&state.mode, key, value);
                if passes {
                    if state.passing.insert(key.clone()) {
                        emissions.push(Delta::update(key.clone(), value.clone()));
                    }
                } else if state.passing.remove(key) {
                    emissions.push(Delta::remove(key.clone()));
                }
            }
            emissions
        };
        debug!(
            "Mode of '{}' changed, {} keys re-filtered",
            self.inner.stream_id,
            emissions.len()
        );
        self.publish(emissions)
    }

    pub fn on_delta(&self, delta: Delta<K, V>) -> Result<()> {
        let emission = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match delta {
                Delta::Update { key, value } => {
                    let passes = (self.inner.predicate)(&state.mode, &key, &value);
                    state.values.insert(key.clone(), value.clone());
                    if passes {
                        state.passing.insert(key.clone());
                        Some(Delta::update(key, value))
                    } else if state.passing.remove(&key) {
                        Some(Delta::remove(key))
                    } else {
                        None
                    }
                }
                Delta::Remove { key } => {
                    state.values.remove(&key);
                    state.passing.remove(&key).then(|| Delta::remove(key))
                }
            }
        };
        self.publish(emission.into_iter().collect())
    }

    /// Sink that feeds mode updates into [`set_mode`](Self::set_mode)
    pub fn mode_control(&self) -> ModeControl<K, V, M> {
        ModeControl {
            filter: self.clone(),
        }
    }

    fn publish(&self, deltas: Vec<Delta<K, V>>) -> Result<()> {
        for delta in deltas {
            self.inner.output.publish(delta)?;
        }
        Ok(())
    }
}

impl<K: KeyData, V: Data, M: Data> DeltaSink<K, V> for ModalFilter<K, V, M> {
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        self.on_delta(delta)
    }
}

impl<K: KeyData, V: Data, M: Data> DeltaSource<K, V> for ModalFilter<K, V, M> {
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>) {
        self.inner.output.subscribe(sink);
    }
}

/// Mode stream of a [`ModalFilter`]; removals keep the current mode
pub struct ModeControl<K, V, M> {
    filter: ModalFilter<K, V, M>,
}

impl<CK, K: KeyData, V: Data, M: Data> DeltaSink<CK, M> for ModeControl<K, V, M> {
    fn accept(&self, delta: Delta<CK, M>) -> Result<()> {
        match delta {
            Delta::Update { value, .. } => self.filter.set_mode(value),
            Delta::Remove { .. } => Ok(()),
        }
    }
}

/// Emits the full key set of its input, under the unit key, after every delta
pub struct KeysCollector<K> {
    keys: Mutex<HashSet<K>>,
    output: Junction<(), HashSet<K>>,
}

impl<K: KeyData> Default for KeysCollector<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeyData> KeysCollector<K> {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
            output: Junction::new(),
        }
    }

    pub fn keys(&self) -> HashSet<K> {
        self.keys.lock().clone()
    }
}

impl<K: KeyData, V> DeltaSink<K, V> for KeysCollector<K> {
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        let keys = {
            let mut keys = self.keys.lock();
            match delta {
                Delta::Update { key, .. } => {
                    keys.insert(key);
                }
                Delta::Remove { key } => {
                    keys.remove(&key);
                }
            }
            keys.clone()
        };
        self.output.publish(Delta::update((), keys))
    }
}

impl<K: KeyData> DeltaSource<(), HashSet<K>> for KeysCollector<K> {
    fn subscribe(&self, sink: Arc<dyn DeltaSink<(), HashSet<K>>>) {
        self.output.subscribe(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RecordingSink;
    use paneflow_state::MemoryPersistence;

    fn threshold_filter() -> (ModalFilter<String, i64, i64>, Arc<RecordingSink<String, i64>>) {
        let filter = ModalFilter::new("filtered", 10, |min: &i64, _: &String, v: &i64| v >= min).unwrap();
        let sink = Arc::new(RecordingSink::new());
        filter.subscribe(sink.clone());
        (filter, sink)
    }

    fn update(key: &str, value: i64) -> Delta<String, i64> {
        Delta::update(key.to_string(), value)
    }

    fn remove(key: &str) -> Delta<String, i64> {
        Delta::remove(key.to_string())
    }

    #[test]
    fn test_filter_passes_and_removes() {
        let (filter, sink) = threshold_filter();
        filter.on_delta(update("a", 12)).unwrap();
        filter.on_delta(update("b", 3)).unwrap();
        filter.on_delta(update("a", 4)).unwrap();
        filter.on_delta(remove("b")).unwrap();

        assert_eq!(sink.deltas(), vec![update("a", 12), remove("a")]);
    }

    #[test]
    fn test_mode_change_refilters() {
        let (filter, sink) = threshold_filter();
        filter.on_delta(update("a", 12)).unwrap();
        filter.on_delta(update("b", 5)).unwrap();
        sink.take();

        filter.mode_control().accept(Delta::update((), 0)).unwrap();
        assert_eq!(sink.take(), vec![update("b", 5)]);

        filter.set_mode(20).unwrap();
        let mut removed = sink.take();
        removed.sort_by(|x, y| x.key().cmp(y.key()));
        assert_eq!(removed, vec![remove("a"), remove("b")]);
        assert_eq!(filter.mode(), 20);
    }

    #[test]
    fn test_durable_mode_survives_restart() {
        let memory: Arc<dyn PersistenceProvider> = Arc::new(MemoryPersistence::new());
        let predicate = |min: &i64, _: &String, v: &i64| v >= min;
        let first = ModalFilter::<String, i64, i64>::durable("moded", 10, predicate, memory.clone()).unwrap();
        first.set_mode(42).unwrap();

        let second = ModalFilter::<String, i64, i64>::durable("moded", 10, predicate, memory).unwrap();
        assert_eq!(second.mode(), 42);
    }

    #[test]
    fn test_keys_collector_tracks_set() {
        let collector = KeysCollector::<i32>::new();
        let sink = Arc::new(RecordingSink::<(), HashSet<i32>>::new());
        collector.subscribe(sink.clone());

        for delta in [
            Delta::update(1, 2),
            Delta::update(2, 3),
            Delta::update(3, 4),
            Delta::remove(2),
        ] {
            DeltaSink::<i32, i32>::accept(&collector, delta).unwrap();
        }

        let sets = sink.values();
        assert_eq!(sets.len(), 4);
        assert_eq!(sets[0], HashSet::from([1]));
        assert_eq!(sets[1], HashSet::from([1, 2]));
        assert_eq!(sets[2], HashSet::from([1, 2, 3]));
        assert_eq!(sets[3], HashSet::from([1, 3]));
        assert_eq!(collector.keys(), HashSet::from([1, 3]));
    }
}
