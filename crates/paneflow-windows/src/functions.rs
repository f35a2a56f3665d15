//! User-supplied functions
//!
//! Seeds, folds, combiners, criteria and thresholds are plain function values
//! with their configuration captured. Fallible variants report failures as
//! [`StreamError::UserFunction`](paneflow_core::StreamError::UserFunction).

use paneflow_core::{Result, TimestampMs};
use std::sync::Arc;

/// Initial accumulator value of a window
pub type SeedFn<W, U> = Arc<dyn Fn(&W) -> Result<U> + Send + Sync>;

/// Folds one element into a window's accumulated value
pub type FoldFn<W, U, T> = Arc<dyn Fn(&W, U, &T) -> Result<U> + Send + Sync>;

/// Associative merge of two partial results of the same window
pub type CombineFn<W, U> = Arc<dyn Fn(&W, U, U) -> Result<U> + Send + Sync>;

/// Orderable projection of a timestamped element used for eviction
pub type CriterionFn<T, C> = Arc<dyn Fn(TimestampMs, &T) -> C + Send + Sync>;

/// Smallest criterion retained, given the largest criterion seen in a pane
pub type ThresholdFn<C> = Arc<dyn Fn(&C) -> C + Send + Sync>;

pub fn seed_fn<W: 'static, U: 'static>(
    f: impl Fn(&W) -> U + Send + Sync + 'static,
) -> SeedFn<W, U> {
    Arc::new(move |w: &W| Ok(f(w)))
}

pub fn try_seed_fn<W: 'static, U: 'static>(
    f: impl Fn(&W) -> Result<U> + Send + Sync + 'static,
) -> SeedFn<W, U> {
    Arc::new(f)
}

pub fn fold_fn<W: 'static, U: 'static, T: 'static>(
    f: impl Fn(&W, U, &T) -> U + Send + Sync + 'static,
) -> FoldFn<W, U, T> {
    Arc::new(move |w: &W, acc: U, value: &T| Ok(f(w, acc, value)))
}

pub fn try_fold_fn<W: 'static, U: 'static, T: 'static>(
    f: impl Fn(&W, U, &T) -> Result<U> + Send + Sync + 'static,
) -> FoldFn<W, U, T> {
    Arc::new(f)
}

pub fn combine_fn<W: 'static, U: 'static>(
    f: impl Fn(&W, U, U) -> U + Send + Sync + 'static,
) -> CombineFn<W, U> {
    Arc::new(move |w: &W, a: U, b: U| Ok(f(w, a, b)))
}

pub fn try_combine_fn<W: 'static, U: 'static>(
    f: impl Fn(&W, U, U) -> Result<U> + Send + Sync + 'static,
) -> CombineFn<W, U> {
    Arc::new(f)
}
