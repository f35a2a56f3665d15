//! In-memory persistence provider
//!
//! Keeps every cell in a concurrent map. Useful for tests, for transient
//! deployments that still want the durable code path, and for saving a
//! snapshot to disk between runs.

use crate::provider::PersistenceProvider;
use crate::stats::StateStats;
use crate::tags::StateTag;
use dashmap::DashMap;
use paneflow_core::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Value(Vec<u8>),
    Set(BTreeSet<Vec<u8>>),
    Map(BTreeMap<Vec<u8>, Vec<u8>>),
}

/// Serializable form of one stored cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotCell {
    Value(Vec<u8>),
    Set(Vec<Vec<u8>>),
    Map(Vec<(Vec<u8>, Vec<u8>)>),
}

/// Point-in-time copy of every cell of a [`MemoryPersistence`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSnapshot {
    pub cells: BTreeMap<String, SnapshotCell>,
}

impl PersistenceSnapshot {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Thread-safe in-memory [`PersistenceProvider`]
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    cells: DashMap<String, Cell>,
    stats: Arc<StateStats>,
    reject_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider holding the cells of a snapshot
    pub fn from_snapshot(snapshot: PersistenceSnapshot) -> Self {
        let persistence = Self::new();
        persistence.restore(snapshot);
        persistence
    }

    /// Copy every cell
    pub fn snapshot(&self) -> PersistenceSnapshot {
        let cells = self
            .cells
            .iter()
            .map(|entry| {
                let cell = match entry.value() {
                    Cell::Value(bytes) => SnapshotCell::Value(bytes.clone()),
                    Cell::Set(members) => SnapshotCell::Set(members.iter().cloned().collect()),
                    Cell::Map(entries) => SnapshotCell::Map(
                        entries
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    ),
                };
                (entry.key().clone(), cell)
            })
            .collect();
        PersistenceSnapshot { cells }
    }

    /// Replace all cells with the contents of a snapshot
    pub fn restore(&self, snapshot: PersistenceSnapshot) {
        self.cells.clear();
        for (tag, cell) in snapshot.cells {
            let cell = match cell {
                SnapshotCell::Value(bytes) => Cell::Value(bytes),
                SnapshotCell::Set(members) => Cell::Set(members.into_iter().collect()),
                SnapshotCell::Map(entries) => Cell::Map(entries.into_iter().collect()),
            };
            self.cells.insert(tag, cell);
        }
        tracing::debug!("Restored {} persisted cells", self.cells.len());
    }

    /// Make every subsequent write fail, simulating an unavailable backend
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &Arc<StateStats> {
        &self.stats
    }

    /// Number of stored cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, tag: &StateTag) -> bool {
        self.cells.contains_key(tag.as_str())
    }

    fn check_writable(&self, tag: &StateTag) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            self.stats.record_failure();
            return Err(StreamError::Persistence(format!(
                "write to '{}' rejected",
                tag
            )));
        }
        Ok(())
    }

    fn shape_mismatch(&self, tag: &StateTag, expected: &str) -> StreamError {
        self.stats.record_failure();
        StreamError::Persistence(format!("cell '{}' is not a {}", tag, expected))
    }
}

impl PersistenceProvider for MemoryPersistence {
    fn get_value(&self, tag: &StateTag) -> Result<Option<Vec<u8>>> {
        self.stats.record_read();
        match self.cells.get(tag.as_str()).as_deref() {
            Some(Cell::Value(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(self.shape_mismatch(tag, "value")),
            None => Ok(None),
        }
    }

    fn set_value(&self, tag: &StateTag, bytes: Vec<u8>) -> Result<()> {
        self.check_writable(tag)?;
        self.stats.record_write(bytes.len());
        self.cells.insert(tag.as_str().to_string(), Cell::Value(bytes));
        Ok(())
    }

    fn remove_value(&self, tag: &StateTag) -> Result<()> {
        self.check_writable(tag)?;
        self.stats.record_removal();
        self.cells.remove(tag.as_str());
        Ok(())
    }

    fn set_add(&self, tag: &StateTag, member: Vec<u8>) -> Result<()> {
        self.check_writable(tag)?;
        let size = member.len();
        let mut cell = self
            .cells
            .entry(tag.as_str().to_string())
            .or_insert_with(|| Cell::Set(BTreeSet::new()));
        let matched = match cell.value_mut() {
            Cell::Set(members) => {
                members.insert(member);
                true
            }
            _ => false,
        };
        drop(cell);
        if !matched {
            return Err(self.shape_mismatch(tag, "set"));
        }
        self.stats.record_write(size);
        Ok(())
    }

    fn set_remove(&self, tag: &StateTag, member: &[u8]) -> Result<()> {
        self.check_writable(tag)?;
        self.stats.record_removal();
        let matched = match self.cells.get_mut(tag.as_str()) {
            Some(mut cell) => match cell.value_mut() {
                Cell::Set(members) => {
                    members.remove(member);
                    true
                }
                _ => false,
            },
            None => true,
        };
        if !matched {
            return Err(self.shape_mismatch(tag, "set"));
        }
        Ok(())
    }

    fn set_members(&self, tag: &StateTag) -> Result<Vec<Vec<u8>>> {
        self.stats.record_read();
        match self.cells.get(tag.as_str()).as_deref() {
            Some(Cell::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(self.shape_mismatch(tag, "set")),
            None => Ok(Vec::new()),
        }
    }

    fn map_insert(&self, tag: &StateTag, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_writable(tag)?;
        let size = key.len() + value.len();
        let mut cell = self
            .cells
            .entry(tag.as_str().to_string())
            .or_insert_with(|| Cell::Map(BTreeMap::new()));
        let matched = match cell.value_mut() {
            Cell::Map(entries) => {
                entries.insert(key, value);
                true
            }
            _ => false,
        };
        drop(cell);
        if !matched {
            return Err(self.shape_mismatch(tag, "map"));
        }
        self.stats.record_write(size);
        Ok(())
    }

    fn map_remove(&self, tag: &StateTag, key: &[u8]) -> Result<()> {
        self.check_writable(tag)?;
        self.stats.record_removal();
        let matched = match self.cells.get_mut(tag.as_str()) {
            Some(mut cell) => match cell.value_mut() {
                Cell::Map(entries) => {
                    entries.remove(key);
                    true
                }
                _ => false,
            },
            None => true,
        };
        if !matched {
            return Err(self.shape_mismatch(tag, "map"));
        }
        Ok(())
    }

    fn map_entries(&self, tag: &StateTag) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.stats.record_read();
        match self.cells.get(tag.as_str()).as_deref() {
            Some(Cell::Map(entries)) => Ok(entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            Some(_) => Err(self.shape_mismatch(tag, "map")),
            None => Ok(Vec::new()),
        }
    }

    fn map_clear(&self, tag: &StateTag) -> Result<()> {
        self.check_writable(tag)?;
        self.stats.record_removal();
        self.cells.remove(tag.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::Discriminator;

    fn tag(name: &str) -> StateTag {
        StateTag::stream(name, Discriminator::Keys).unwrap()
    }

    #[test]
    fn test_value_roundtrip() {
        let persistence = MemoryPersistence::new();
        let t = tag("values");

        assert_eq!(persistence.get_value(&t).unwrap(), None);
        persistence.set_value(&t, b"42".to_vec()).unwrap();
        assert_eq!(persistence.get_value(&t).unwrap(), Some(b"42".to_vec()));

        persistence.remove_value(&t).unwrap();
        assert_eq!(persistence.get_value(&t).unwrap(), None);
        assert!(persistence.is_empty());
    }

    #[test]
    fn test_set_operations() {
        let persistence = MemoryPersistence::new();
        let t = tag("members");

        persistence.set_add(&t, b"a".to_vec()).unwrap();
        persistence.set_add(&t, b"b".to_vec()).unwrap();
        persistence.set_add(&t, b"a".to_vec()).unwrap();
        assert_eq!(persistence.set_members(&t).unwrap().len(), 2);

        persistence.set_remove(&t, b"a").unwrap();
        assert_eq!(persistence.set_members(&t).unwrap(), vec![b"b".to_vec()]);
    }

    #[test]
    fn test_map_operations() {
        let persistence = MemoryPersistence::new();
        let t = tag("entries");

        persistence.map_insert(&t, b"2".to_vec(), b"two".to_vec()).unwrap();
        persistence.map_insert(&t, b"1".to_vec(), b"one".to_vec()).unwrap();
        persistence.map_remove(&t, b"2").unwrap();

        let entries = persistence.map_entries(&t).unwrap();
        assert_eq!(entries, vec![(b"1".to_vec(), b"one".to_vec())]);

        persistence.map_clear(&t).unwrap();
        assert!(persistence.map_entries(&t).unwrap().is_empty());
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let persistence = MemoryPersistence::new();
        let t = tag("mixed");

        persistence.set_value(&t, b"1".to_vec()).unwrap();
        assert!(persistence.set_add(&t, b"x".to_vec()).is_err());
        assert!(persistence.map_entries(&t).is_err());
        assert_eq!(persistence.stats().failures(), 2);
    }

    #[test]
    fn test_rejected_writes() {
        let persistence = MemoryPersistence::new();
        let t = tag("rejected");

        persistence.set_reject_writes(true);
        let err = persistence.set_value(&t, b"1".to_vec()).unwrap_err();
        assert!(matches!(err, StreamError::Persistence(_)));
        assert!(!persistence.contains(&t));

        persistence.set_reject_writes(false);
        persistence.set_value(&t, b"1".to_vec()).unwrap();
        assert!(persistence.contains(&t));
    }

    #[test]
    fn test_snapshot_restore() {
        let persistence = MemoryPersistence::new();
        persistence.set_value(&tag("v"), b"1".to_vec()).unwrap();
        persistence.set_add(&tag("s"), b"m".to_vec()).unwrap();
        persistence
            .map_insert(&tag("m"), b"k".to_vec(), b"v".to_vec())
            .unwrap();

        let snapshot = persistence.snapshot();
        assert_eq!(snapshot.len(), 3);

        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: PersistenceSnapshot = serde_json::from_str(&json).unwrap();
        let restored = MemoryPersistence::from_snapshot(decoded);

        assert_eq!(restored.get_value(&tag("v")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(restored.set_members(&tag("s")).unwrap(), vec![b"m".to_vec()]);
        assert_eq!(restored.map_entries(&tag("m")).unwrap().len(), 1);
    }
}
