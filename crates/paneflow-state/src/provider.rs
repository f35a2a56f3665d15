//! The persistence capability consumed by durable state

use crate::tags::StateTag;
use paneflow_core::Result;
use std::fmt;

/// Durable storage addressed by opaque state tags.
///
/// Three cell shapes live behind a tag: a single value, a set of members, and
/// a map of entries. Keys, members and values are opaque bytes; typed access
/// goes through [`crate::cells`]. Implementations must provide durability and
/// ordering of writes for a single tag; callers serialize all writes for one
/// key, so no concurrent writers target the same tag.
pub trait PersistenceProvider: Send + Sync + fmt::Debug {
    /// Read the value stored under a tag
    fn get_value(&self, tag: &StateTag) -> Result<Option<Vec<u8>>>;

    /// Replace the value stored under a tag
    fn set_value(&self, tag: &StateTag, bytes: Vec<u8>) -> Result<()>;

    /// Delete the value stored under a tag
    fn remove_value(&self, tag: &StateTag) -> Result<()>;

    /// Add a member to the set stored under a tag
    fn set_add(&self, tag: &StateTag, member: Vec<u8>) -> Result<()>;

    /// Remove a member from the set stored under a tag
    fn set_remove(&self, tag: &StateTag, member: &[u8]) -> Result<()>;

    /// All members of the set stored under a tag
    fn set_members(&self, tag: &StateTag) -> Result<Vec<Vec<u8>>>;

    /// Insert or replace an entry of the map stored under a tag
    fn map_insert(&self, tag: &StateTag, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove an entry of the map stored under a tag
    fn map_remove(&self, tag: &StateTag, key: &[u8]) -> Result<()>;

    /// All entries of the map stored under a tag
    fn map_entries(&self, tag: &StateTag) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Drop the whole map stored under a tag
    fn map_clear(&self, tag: &StateTag) -> Result<()>;
}
