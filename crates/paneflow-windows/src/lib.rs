//! Windowed pane aggregation for paneflow
//!
//! This crate provides per-key window aggregation built from small
//! pluggable parts.
//!
//! # Features
//!
//! - **Assigners**: tumbling, sliding and global windows
//! - **Triggers**: count, end-of-window and periodic triggers
//! - **Eviction**: threshold eviction over sequences or criterion-ordered maps
//! - **Configurations**: fold-only, sequence with replay, ordered map with combiner
//! - **Pane manager**: wires the parts to transient or durable stores

pub mod evaluator;
pub mod eviction;
pub mod functions;
pub mod pane;
pub mod trigger;
pub mod updater;
pub mod window;

pub use evaluator::{FoldingEvaluator, IdentityEvaluator, PaneEvaluator, ReducingEvaluator};
pub use eviction::{
    EvictionStrategy, Evictor, MapThresholdEvictor, NoOpEvictor, SequenceThresholdEvictor,
    ThresholdEviction,
};
pub use functions::{
    combine_fn, fold_fn, seed_fn, try_combine_fn, try_fold_fn, try_seed_fn, CombineFn,
    CriterionFn, FoldFn, SeedFn, ThresholdFn,
};
pub use pane::{DefaultPaneManager, EventOutcome, PaneManager};
pub use trigger::{
    CountTrigger, EndOfWindowTrigger, IdlePolicy, PeriodicState, PeriodicTrigger, Trigger,
    TriggerAction, TriggerKind, TriggerKindState,
};
pub use updater::{FoldPaneUpdater, MapPaneUpdater, PaneUpdater, SequencePaneUpdater};
pub use window::{
    BoundedWindow, GlobalWindow, GlobalWindows, SlidingWindows, TimeInterval, TumblingWindows,
    WindowAssigner, WindowKind,
};
