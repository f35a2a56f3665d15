//! State binding for paneflow
//!
//! This crate connects per-key window state to a persistence capability.
//!
//! # Features
//!
//! - **Persistence capability**: byte-level value, set and ordered-map cells
//!   addressed by opaque [`StateTag`]s
//! - **Typed cells**: [`ValueCell`], [`SetCell`] and [`OrderedMapCell`] over any provider
//! - **Memory provider**: [`MemoryPersistence`] with snapshot/restore
//! - **Accumulators**: folded values, timestamped sequences and criterion-ordered maps
//! - **Stores**: transient or durable per-window accumulator and window-state stores
//!
//! # Example
//!
//! ```ignore
//! use paneflow_state::{MemoryPersistence, PersistenceProvider, StateTag, Discriminator, ValueCell};
//! use std::sync::Arc;
//!
//! let persistence: Arc<dyn PersistenceProvider> = Arc::new(MemoryPersistence::new());
//! let tag = StateTag::stream("sensors", Discriminator::Period)?;
//! let period = ValueCell::new(persistence, tag, 1_000u64);
//! period.set(&250)?;
//! assert_eq!(period.get()?, 250);
//! ```

pub mod accumulator;
pub mod cells;
pub mod memory;
pub mod provider;
pub mod stats;
pub mod store;
pub mod tags;

pub use accumulator::{
    EntryKey, FoldAccumulator, OrderedAccumulator, PaneAccumulator, SequenceAccumulator,
};
pub use cells::{OrderedMapCell, SetCell, ValueCell};
pub use memory::{MemoryPersistence, PersistenceSnapshot, SnapshotCell};
pub use provider::PersistenceProvider;
pub use stats::StateStats;
pub use store::{AccumulatorStore, DurableAccumulators, TransientAccumulators, WindowStates};
pub use tags::{Discriminator, StateForms, StateTag};
