//! Per-window accumulator and window-state stores
//!
//! A pane manager owns one [`AccumulatorStore`] and one [`WindowStates`] per
//! key. Transient stores keep everything in memory; durable stores mirror each
//! write into a persistence provider and load lazily on first access.

use crate::accumulator::PaneAccumulator;
use crate::cells::ValueCell;
use crate::provider::PersistenceProvider;
use crate::tags::StateTag;
use paneflow_core::{Data, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Accumulators of the open panes of one key
pub trait AccumulatorStore<W, A>: Send {
    /// Accumulator of `window`, loading it if needed
    fn get(&mut self, window: &W) -> Result<Option<&A>>;

    /// Remove the accumulator from the store for an in-place update.
    ///
    /// The persisted copy is left untouched until `put` or `remove`.
    fn take(&mut self, window: &W) -> Result<Option<A>>;

    /// Store (and persist) the accumulator of `window`
    fn put(&mut self, window: W, accumulator: A) -> Result<()>;

    /// Drop the accumulator of `window` everywhere
    fn remove(&mut self, window: &W) -> Result<()>;

    fn is_durable(&self) -> bool;
}

/// Accumulators held only in memory
#[derive(Debug)]
pub struct TransientAccumulators<W, A> {
    panes: BTreeMap<W, A>,
}

impl<W, A> Default for TransientAccumulators<W, A> {
    fn default() -> Self {
        Self {
            panes: BTreeMap::new(),
        }
    }
}

impl<W: Ord, A> TransientAccumulators<W, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }
}

impl<W, A> AccumulatorStore<W, A> for TransientAccumulators<W, A>
where
    W: Ord + Send,
    A: PaneAccumulator,
{
    fn get(&mut self, window: &W) -> Result<Option<&A>> {
        Ok(self.panes.get(window))
    }

    fn take(&mut self, window: &W) -> Result<Option<A>> {
        Ok(self.panes.remove(window))
    }

    fn put(&mut self, window: W, mut accumulator: A) -> Result<()> {
        accumulator.settle();
        self.panes.insert(window, accumulator);
        Ok(())
    }

    fn remove(&mut self, window: &W) -> Result<()> {
        self.panes.remove(window);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Accumulators mirrored into a persistence provider.
///
/// Each window's accumulator lives under `base#window`.
#[derive(Debug)]
pub struct DurableAccumulators<W, A> {
    provider: Arc<dyn PersistenceProvider>,
    base: StateTag,
    cache: BTreeMap<W, A>,
}

impl<W: Data + Ord, A: PaneAccumulator> DurableAccumulators<W, A> {
    pub fn new(provider: Arc<dyn PersistenceProvider>, base: StateTag) -> Self {
        Self {
            provider,
            base,
            cache: BTreeMap::new(),
        }
    }

    pub fn base_tag(&self) -> &StateTag {
        &self.base
    }

    fn load(&self, window: &W) -> Result<Option<A>> {
        let tag = self.base.for_window(window)?;
        let loaded = A::load(&self.provider, &tag)?;
        if loaded.is_some() {
            debug!("Loaded accumulator {}", tag);
        }
        Ok(loaded)
    }
}

impl<W, A> AccumulatorStore<W, A> for DurableAccumulators<W, A>
where
    W: Data + Ord,
    A: PaneAccumulator,
{
    fn get(&mut self, window: &W) -> Result<Option<&A>> {
        if !self.cache.contains_key(window) {
            match self.load(window)? {
                Some(accumulator) => {
                    self.cache.insert(window.clone(), accumulator);
                }
                None => return Ok(None),
            }
        }
        Ok(self.cache.get(window))
    }

    fn take(&mut self, window: &W) -> Result<Option<A>> {
        match self.cache.remove(window) {
            Some(accumulator) => Ok(Some(accumulator)),
            None => self.load(window),
        }
    }

    fn put(&mut self, window: W, mut accumulator: A) -> Result<()> {
        let tag = self.base.for_window(&window)?;
        accumulator.save(&self.provider, &tag)?;
        self.cache.insert(window, accumulator);
        Ok(())
    }

    fn remove(&mut self, window: &W) -> Result<()> {
        self.cache.remove(window);
        let tag = self.base.for_window(window)?;
        A::erase(&self.provider, &tag)
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Open windows of one key and the trigger state of each
#[derive(Debug)]
pub struct WindowStates<W, S> {
    windows: BTreeMap<W, S>,
    cell: Option<ValueCell<Vec<(W, S)>>>,
}

impl<W, S> WindowStates<W, S>
where
    W: Data + Ord,
    S: Data,
{
    pub fn transient() -> Self {
        Self {
            windows: BTreeMap::new(),
            cell: None,
        }
    }

    /// Window states persisted under `tag`, loading what was stored there
    pub fn durable(provider: Arc<dyn PersistenceProvider>, tag: StateTag) -> Result<Self> {
        let cell = ValueCell::new(provider, tag, Vec::new());
        let windows = cell.get()?.into_iter().collect();
        Ok(Self {
            windows,
            cell: Some(cell),
        })
    }

    pub fn get(&self, window: &W) -> Option<&S> {
        self.windows.get(window)
    }

    pub fn contains(&self, window: &W) -> bool {
        self.windows.contains_key(window)
    }

    pub fn put(&mut self, window: W, state: S) -> Result<()> {
        self.windows.insert(window, state);
        self.flush()
    }

    pub fn remove(&mut self, window: &W) -> Result<Option<S>> {
        let removed = self.windows.remove(window);
        if removed.is_some() {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Forget every window, including the persisted copy
    pub fn clear(&mut self) -> Result<()> {
        self.windows.clear();
        match &self.cell {
            Some(cell) => cell.clear(),
            None => Ok(()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&W, &S)> {
        self.windows.iter()
    }

    pub fn windows(&self) -> impl Iterator<Item = &W> {
        self.windows.keys()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn flush(&self) -> Result<()> {
        let Some(cell) = &self.cell else {
            return Ok(());
        };
        if self.windows.is_empty() {
            return cell.clear();
        }
        let entries: Vec<(W, S)> = self
            .windows
            .iter()
            .map(|(w, s)| (w.clone(), s.clone()))
            .collect();
        cell.set(&entries)
    }
}
