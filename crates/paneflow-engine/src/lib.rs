//! Keyed window engine for paneflow
//!
//! This crate drives pane managers from a delta stream.
//!
//! # Features
//!
//! - **Keyed engine**: one lazily created lane per key, timers re-entering
//!   trigger evaluation, durable key sets restored on start
//! - **Scheduling**: tokio-backed and manual (virtual clock) schedulers
//! - **Partitioned driver**: per-key ordered delivery over tokio workers
//! - **Temporal decoupling**: discrete and continuous re-emission on a
//!   constant or dynamic period
//! - **Connectors**: modal filter and key-set collector
//!
//! # Example
//!
//! ```no_run
//! use paneflow_core::{Delta, Result};
//! use paneflow_engine::{KeyedWindowEngine, ManualScheduler, WindowSpec};
//! use paneflow_windows::{EndOfWindowTrigger, TimeInterval, TumblingWindows, WindowAssigner};
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let window = TumblingWindows::new(1_000)?;
//!     let spec = WindowSpec::new(
//!         "totals",
//!         move |_: &String| -> Box<dyn WindowAssigner<f64, TimeInterval>> { Box::new(window) },
//!         |_: &String| EndOfWindowTrigger,
//!         |_: &String, _: &TimeInterval| 0.0,
//!         |_: &String, _: &TimeInterval, acc: f64, v: &f64| acc + v,
//!     );
//!     let engine = KeyedWindowEngine::new(spec, Arc::new(ManualScheduler::new()))?;
//!     engine.on_delta(Delta::update("sensor-1".to_string(), 4.2))?;
//!     Ok(())
//! }
//! ```

pub mod connectors;
pub mod decoupling;
pub mod driver;
pub mod engine;
pub mod schedule;
pub mod source;
pub mod spec;
pub mod stats;
pub mod timestamps;

pub use connectors::{KeysCollector, ModalFilter, ModeControl, ModePredicate};
pub use decoupling::{
    sample, DecouplerConfig, Interpretation, PeriodControl, Sampled, Sampling, TemporalDecoupler,
};
pub use driver::{EngineConfig, PartitionedDriver};
pub use engine::{EngineFailure, KeyedWindowEngine};
pub use schedule::{delay_until, ManualScheduler, Scheduler, TimerCallback, TimerHandle, TokioScheduler};
pub use source::{
    ChannelSink, ChannelSource, DeltaSink, DeltaSource, Junction, MemorySource, RecordingSink,
};
pub use spec::{
    AssignerFactory, EvictionFactory, KeyedCombineFn, KeyedFoldFn, KeyedSeedFn, TriggerFactory,
    WindowSpec,
};
pub use stats::{DecouplerStats, EngineStats};
pub use timestamps::TimestampAssigner;
