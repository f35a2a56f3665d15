//! Accumulator kinds held by a pane
//!
//! A pane accumulates either a single folded value, an append-only sequence
//! of timestamped elements, or a criterion-ordered map of elements. Each kind
//! knows how to mirror itself into a persistence provider.

use crate::cells::{decode, encode, OrderedMapCell};
use crate::provider::PersistenceProvider;
use crate::tags::{Discriminator, StateTag};
use paneflow_core::{Data, Result, Timestamped};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// State that can back a pane
pub trait PaneAccumulator: Send + Sized + 'static {
    /// Discriminator used in the tags of this kind
    fn discriminator() -> Discriminator;

    /// Read the accumulator stored under `tag`
    fn load(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<Option<Self>>;

    /// Mirror the accumulator (or its pending changes) under `tag`
    fn save(&mut self, provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()>;

    /// Delete whatever is stored under `tag`
    fn erase(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()>;

    /// Forget pending changes when the accumulator lives only in memory
    fn settle(&mut self) {}
}

/// A single folded value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldAccumulator<U> {
    pub value: U,
}

impl<U> FoldAccumulator<U> {
    pub fn new(value: U) -> Self {
        Self { value }
    }
}

impl<U: Data> PaneAccumulator for FoldAccumulator<U> {
    fn discriminator() -> Discriminator {
        Discriminator::Value
    }

    fn load(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<Option<Self>> {
        provider
            .get_value(tag)?
            .map(|bytes| decode(&bytes).map(FoldAccumulator::new))
            .transpose()
    }

    fn save(&mut self, provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()> {
        provider.set_value(tag, encode(&self.value)?)
    }

    fn erase(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()> {
        provider.remove_value(tag)
    }
}

/// Append-only sequence of timestamped elements in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceAccumulator<T> {
    items: VecDeque<Timestamped<T>>,
}

impl<T> Default for SequenceAccumulator<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> SequenceAccumulator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timestamp: i64, value: T) {
        self.items.push_back(Timestamped::new(timestamp, value));
    }

    pub fn front(&self) -> Option<&Timestamped<T>> {
        self.items.front()
    }

    pub fn back(&self) -> Option<&Timestamped<T>> {
        self.items.back()
    }

    pub fn pop_front(&mut self) -> Option<Timestamped<T>> {
        self.items.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timestamped<T>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Data> PaneAccumulator for SequenceAccumulator<T> {
    fn discriminator() -> Discriminator {
        Discriminator::Sequence
    }

    fn load(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<Option<Self>> {
        provider
            .get_value(tag)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn save(&mut self, provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()> {
        provider.set_value(tag, encode(self)?)
    }

    fn erase(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()> {
        provider.remove_value(tag)
    }
}

/// Key of an ordered-map entry.
///
/// Criteria may collide, so entries are keyed by the criterion and then by
/// the arrival sequence number within the pane.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey<C> {
    pub criterion: C,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum MapChange<C> {
    Inserted(EntryKey<C>),
    Removed(EntryKey<C>),
}

/// Elements ordered by eviction criterion.
///
/// Mutations are journaled so a durable store writes only the entries that
/// changed since the last save.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedAccumulator<C, T> {
    entries: BTreeMap<EntryKey<C>, T>,
    next_seq: u64,
    journal: Vec<MapChange<C>>,
    fresh: bool,
}

impl<C: Ord + Clone, T> Default for OrderedAccumulator<C, T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
            journal: Vec::new(),
            fresh: true,
        }
    }
}

impl<C: Ord + Clone, T> OrderedAccumulator<C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an element under its criterion; returns the key it was stored at
    pub fn insert(&mut self, criterion: C, value: T) -> EntryKey<C> {
        let key = EntryKey {
            criterion,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key.clone(), value);
        self.journal.push(MapChange::Inserted(key.clone()));
        key
    }

    /// Remove the entry with the smallest key
    pub fn pop_first(&mut self) -> Option<(EntryKey<C>, T)> {
        let (key, value) = self.entries.pop_first()?;
        self.journal.push(MapChange::Removed(key.clone()));
        Some((key, value))
    }

    pub fn first_key(&self) -> Option<&EntryKey<C>> {
        self.entries.keys().next()
    }

    pub fn last_key(&self) -> Option<&EntryKey<C>> {
        self.entries.keys().next_back()
    }

    /// Entries in ascending criterion order
    pub fn iter(&self) -> impl Iterator<Item = (&EntryKey<C>, &T)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of changes not yet mirrored to persistence
    pub fn pending_changes(&self) -> usize {
        self.journal.len()
    }
}

impl<C, T> PaneAccumulator for OrderedAccumulator<C, T>
where
    C: Data + Ord,
    T: Data,
{
    fn discriminator() -> Discriminator {
        Discriminator::OrderedMap
    }

    fn load(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<Option<Self>> {
        let cell: OrderedMapCell<EntryKey<C>, T> = OrderedMapCell::new(provider.clone(), tag.clone());
        let entries = cell.range(..)?;
        if entries.is_empty() {
            return Ok(None);
        }
        let next_seq = entries.iter().map(|(k, _)| k.seq).max().map_or(0, |seq| seq + 1);
        Ok(Some(Self {
            entries: entries.into_iter().collect(),
            next_seq,
            journal: Vec::new(),
            fresh: false,
        }))
    }

    fn save(&mut self, provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()> {
        let cell: OrderedMapCell<EntryKey<C>, T> = OrderedMapCell::new(provider.clone(), tag.clone());
        if self.fresh {
            // A newly seeded pane must not inherit entries left under the same tag.
            cell.clear()?;
            self.fresh = false;
        }
        for change in self.journal.drain(..) {
            match change {
                MapChange::Inserted(key) => {
                    if let Some(value) = self.entries.get(&key) {
                        cell.insert(&key, value)?;
                    }
                }
                MapChange::Removed(key) => cell.remove(&key)?,
            }
        }
        Ok(())
    }

    fn erase(provider: &Arc<dyn PersistenceProvider>, tag: &StateTag) -> Result<()> {
        provider.map_clear(tag)
    }

    fn settle(&mut self) {
        self.journal.clear();
        self.fresh = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPersistence;

    fn provider() -> Arc<dyn PersistenceProvider> {
        Arc::new(MemoryPersistence::new())
    }

    fn tag() -> StateTag {
        StateTag::stream("acc", Discriminator::OrderedMap).unwrap()
    }

    #[test]
    fn test_fold_accumulator_roundtrip() {
        let provider = provider();
        let mut acc = FoldAccumulator::new(12.5f64);
        acc.save(&provider, &tag()).unwrap();

        let loaded = FoldAccumulator::<f64>::load(&provider, &tag()).unwrap();
        assert_eq!(loaded, Some(FoldAccumulator::new(12.5)));

        FoldAccumulator::<f64>::erase(&provider, &tag()).unwrap();
        assert_eq!(FoldAccumulator::<f64>::load(&provider, &tag()).unwrap(), None);
    }

    #[test]
    fn test_sequence_keeps_arrival_order() {
        let mut seq = SequenceAccumulator::new();
        seq.push(5, "b");
        seq.push(1, "a");

        let values: Vec<&str> = seq.iter().map(|t| t.value).collect();
        assert_eq!(values, vec!["b", "a"]);
        assert_eq!(seq.pop_front().map(|t| t.timestamp), Some(5));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_ordered_ties_admitted_in_arrival_order() {
        let mut acc = OrderedAccumulator::new();
        let first = acc.insert(7i64, "x");
        let second = acc.insert(7i64, "y");
        acc.insert(3i64, "z");

        assert_ne!(first, second);
        let values: Vec<&str> = acc.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["z", "x", "y"]);
        assert_eq!(acc.first_key().map(|k| k.criterion), Some(3));
        assert_eq!(acc.last_key(), Some(&second));
    }

    #[test]
    fn test_ordered_save_writes_only_changes() {
        let provider = provider();
        let mut acc = OrderedAccumulator::new();
        acc.insert(1i64, 10u32);
        acc.insert(2i64, 20u32);
        acc.save(&provider, &tag()).unwrap();
        assert_eq!(acc.pending_changes(), 0);

        acc.pop_first();
        acc.insert(3i64, 30u32);
        assert_eq!(acc.pending_changes(), 2);
        acc.save(&provider, &tag()).unwrap();

        let loaded = OrderedAccumulator::<i64, u32>::load(&provider, &tag())
            .unwrap()
            .unwrap();
        let values: Vec<u32> = loaded.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![20, 30]);
        assert_eq!(loaded.next_seq, 3);
    }

    #[test]
    fn test_fresh_accumulator_clears_stale_entries() {
        let provider = provider();
        let mut old = OrderedAccumulator::new();
        old.insert(1i64, 1u32);
        old.save(&provider, &tag()).unwrap();

        let mut fresh = OrderedAccumulator::new();
        fresh.insert(9i64, 9u32);
        fresh.save(&provider, &tag()).unwrap();

        let loaded = OrderedAccumulator::<i64, u32>::load(&provider, &tag())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.first_key().map(|k| k.criterion), Some(9));
    }
}
