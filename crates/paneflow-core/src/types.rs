use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Milliseconds, either event time or scheduler time.
pub type TimestampMs = i64;

/// Values that can flow through the engine and be persisted.
pub trait Data: Clone + Send + Sync + fmt::Debug + Serialize + DeserializeOwned + 'static {}

impl<T> Data for T where T: Clone + Send + Sync + fmt::Debug + Serialize + DeserializeOwned + 'static
{}

/// Values usable as aggregation keys.
pub trait KeyData: Data + Eq + Hash {}

impl<T> KeyData for T where T: Data + Eq + Hash {}

/// A single change to a keyed stream.
///
/// Inserts and updates are not distinguished: an update of an absent key is
/// an insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta<K, V> {
    Update { key: K, value: V },
    Remove { key: K },
}

impl<K, V> Delta<K, V> {
    pub fn update(key: K, value: V) -> Self {
        Delta::Update { key, value }
    }

    pub fn remove(key: K) -> Self {
        Delta::Remove { key }
    }

    pub fn key(&self) -> &K {
        match self {
            Delta::Update { key, .. } | Delta::Remove { key } => key,
        }
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Delta::Update { value, .. } => Some(value),
            Delta::Remove { .. } => None,
        }
    }

    pub fn map_value<U>(self, f: impl FnOnce(V) -> U) -> Delta<K, U> {
        match self {
            Delta::Update { key, value } => Delta::Update {
                key,
                value: f(value),
            },
            Delta::Remove { key } => Delta::Remove { key },
        }
    }
}

/// A value paired with the time it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub timestamp: TimestampMs,
    pub value: T,
}

impl<T> Timestamped<T> {
    pub fn new(timestamp: TimestampMs, value: T) -> Self {
        Self { timestamp, value }
    }
}

/// An aggregate emitted for one window of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Windowed<W, U> {
    pub window: W,
    pub value: U,
}

impl<W, U> Windowed<W, U> {
    pub fn new(window: W, value: U) -> Self {
        Self { window, value }
    }
}
