//! Typed cells over a persistence provider
//!
//! Each cell encodes its contents with serde JSON and addresses the provider
//! through a single [`StateTag`].

use crate::provider::PersistenceProvider;
use crate::tags::StateTag;
use paneflow_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::ops::RangeBounds;
use std::sync::Arc;

pub(crate) fn encode<V: Serialize + ?Sized>(value: &V) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    Ok(serde_json::from_slice(bytes)?)
}

/// A single persisted value with a fallback initial value
#[derive(Debug, Clone)]
pub struct ValueCell<V> {
    provider: Arc<dyn PersistenceProvider>,
    tag: StateTag,
    initial: V,
}

impl<V: Serialize + DeserializeOwned + Clone> ValueCell<V> {
    pub fn new(provider: Arc<dyn PersistenceProvider>, tag: StateTag, initial: V) -> Self {
        Self {
            provider,
            tag,
            initial,
        }
    }

    /// The stored value, or the initial value when nothing was stored yet
    pub fn get(&self) -> Result<V> {
        Ok(self.load()?.unwrap_or_else(|| self.initial.clone()))
    }

    /// The stored value, if any
    pub fn load(&self) -> Result<Option<V>> {
        self.provider
            .get_value(&self.tag)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn set(&self, value: &V) -> Result<()> {
        self.provider.set_value(&self.tag, encode(value)?)
    }

    /// Forget the stored value; `get` returns the initial value again
    pub fn clear(&self) -> Result<()> {
        self.provider.remove_value(&self.tag)
    }

    pub fn tag(&self) -> &StateTag {
        &self.tag
    }
}

/// A persisted set of members
#[derive(Debug, Clone)]
pub struct SetCell<V> {
    provider: Arc<dyn PersistenceProvider>,
    tag: StateTag,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> SetCell<V> {
    pub fn new(provider: Arc<dyn PersistenceProvider>, tag: StateTag) -> Self {
        Self {
            provider,
            tag,
            _marker: PhantomData,
        }
    }

    pub fn add(&self, member: &V) -> Result<()> {
        self.provider.set_add(&self.tag, encode(member)?)
    }

    pub fn remove(&self, member: &V) -> Result<()> {
        self.provider.set_remove(&self.tag, &encode(member)?)
    }

    /// Decode every member
    pub fn iter(&self) -> Result<std::vec::IntoIter<V>> {
        let members = self
            .provider
            .set_members(&self.tag)?
            .iter()
            .map(|bytes| decode(bytes))
            .collect::<Result<Vec<V>>>()?;
        Ok(members.into_iter())
    }

    pub fn tag(&self) -> &StateTag {
        &self.tag
    }
}

/// A persisted map whose entries are ordered by their decoded keys
#[derive(Debug, Clone)]
pub struct OrderedMapCell<K, V> {
    provider: Arc<dyn PersistenceProvider>,
    tag: StateTag,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> OrderedMapCell<K, V>
where
    K: Serialize + DeserializeOwned + Ord,
    V: Serialize + DeserializeOwned,
{
    pub fn new(provider: Arc<dyn PersistenceProvider>, tag: StateTag) -> Self {
        Self {
            provider,
            tag,
            _marker: PhantomData,
        }
    }

    pub fn insert(&self, key: &K, value: &V) -> Result<()> {
        self.provider
            .map_insert(&self.tag, encode(key)?, encode(value)?)
    }

    pub fn remove(&self, key: &K) -> Result<()> {
        self.provider.map_remove(&self.tag, &encode(key)?)
    }

    /// Entries whose keys fall in `range`, in ascending key order.
    ///
    /// Providers order entries by their encoded bytes, so the cell decodes
    /// and sorts before filtering.
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Result<Vec<(K, V)>> {
        let mut entries = self
            .provider
            .map_entries(&self.tag)?
            .iter()
            .map(|(k, v)| -> Result<(K, V)> { Ok((decode(k)?, decode(v)?)) })
            .collect::<Result<Vec<(K, V)>>>()?;
        entries.retain(|(k, _)| range.contains(k));
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        self.provider.map_clear(&self.tag)
    }

    pub fn tag(&self) -> &StateTag {
        &self.tag
    }
}
