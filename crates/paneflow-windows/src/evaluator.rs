//! Pane evaluators turn an accumulator into the emitted aggregate

use crate::functions::{CombineFn, FoldFn, SeedFn};
use paneflow_core::Result;
use paneflow_state::{FoldAccumulator, OrderedAccumulator, SequenceAccumulator};

/// Produces the emission of a pane
pub trait PaneEvaluator<W, A, U>: Send + Sync {
    fn evaluate(&self, window: &W, accumulator: &A) -> Result<U>;
}

/// The folded value is the emission
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEvaluator;

impl<W, U: Clone> PaneEvaluator<W, FoldAccumulator<U>, U> for IdentityEvaluator {
    fn evaluate(&self, _window: &W, accumulator: &FoldAccumulator<U>) -> Result<U> {
        Ok(accumulator.value.clone())
    }
}

/// Re-seeds and folds the whole surviving sequence on every evaluation
pub struct FoldingEvaluator<W, U, T> {
    seed: SeedFn<W, U>,
    fold: FoldFn<W, U, T>,
}

impl<W, U, T> FoldingEvaluator<W, U, T> {
    pub fn new(seed: SeedFn<W, U>, fold: FoldFn<W, U, T>) -> Self {
        Self { seed, fold }
    }
}

impl<W, U, T> PaneEvaluator<W, SequenceAccumulator<T>, U> for FoldingEvaluator<W, U, T> {
    fn evaluate(&self, window: &W, sequence: &SequenceAccumulator<T>) -> Result<U> {
        sequence
            .iter()
            .try_fold((self.seed)(window)?, |acc, item| {
                (self.fold)(window, acc, &item.value)
            })
    }
}

/// Folds each entry from the seed and merges the partials with a combiner.
///
/// Partials are merged in ascending criterion order. An empty pane evaluates
/// to the seed.
pub struct ReducingEvaluator<W, U, T> {
    seed: SeedFn<W, U>,
    fold: FoldFn<W, U, T>,
    combine: CombineFn<W, U>,
}

impl<W, U, T> ReducingEvaluator<W, U, T> {
    pub fn new(seed: SeedFn<W, U>, fold: FoldFn<W, U, T>, combine: CombineFn<W, U>) -> Self {
        Self {
            seed,
            fold,
            combine,
        }
    }
}

impl<W, U, T, C> PaneEvaluator<W, OrderedAccumulator<C, T>, U> for ReducingEvaluator<W, U, T>
where
    C: Ord + Clone,
{
    fn evaluate(&self, window: &W, entries: &OrderedAccumulator<C, T>) -> Result<U> {
        let mut reduced: Option<U> = None;
        for (_, value) in entries.iter() {
            let partial = (self.fold)(window, (self.seed)(window)?, value)?;
            reduced = Some(match reduced {
                Some(acc) => (self.combine)(window, acc, partial)?,
                None => partial,
            });
        }
        match reduced {
            Some(value) => Ok(value),
            None => (self.seed)(window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{combine_fn, fold_fn, seed_fn};

    fn sum_parts() -> (SeedFn<(), i64>, FoldFn<(), i64, i64>, CombineFn<(), i64>) {
        (
            seed_fn(|_| 0),
            fold_fn(|_, acc, v| acc + v),
            combine_fn(|_, a, b| a + b),
        )
    }

    #[test]
    fn test_identity() {
        let acc = FoldAccumulator::new(7u8);
        assert_eq!(IdentityEvaluator.evaluate(&(), &acc).unwrap(), 7);
    }

    #[test]
    fn test_folding_replays_in_arrival_order() {
        let evaluator = FoldingEvaluator::new(
            seed_fn(|_: &()| String::new()),
            fold_fn(|_, acc: String, v: &char| format!("{}{}", acc, v)),
        );
        let mut seq = SequenceAccumulator::new();
        seq.push(3, 'c');
        seq.push(1, 'a');
        assert_eq!(evaluator.evaluate(&(), &seq).unwrap(), "ca");
    }

    #[test]
    fn test_reducing_combines_partials() {
        let (seed, fold, combine) = sum_parts();
        let evaluator = ReducingEvaluator::new(seed, fold, combine);
        let mut entries = OrderedAccumulator::new();
        entries.insert(2i64, 5i64);
        entries.insert(1i64, 7i64);
        assert_eq!(evaluator.evaluate(&(), &entries).unwrap(), 12);
    }

    #[test]
    fn test_reducing_empty_is_seed() {
        let evaluator = ReducingEvaluator::new(
            seed_fn(|_: &()| 100i64),
            fold_fn(|_, acc, v: &i64| acc + v),
            combine_fn(|_, a, b| a + b),
        );
        let entries = OrderedAccumulator::<i64, i64>::new();
        assert_eq!(evaluator.evaluate(&(), &entries).unwrap(), 100);
    }

    #[test]
    fn test_reducing_respects_criterion_order() {
        let evaluator = ReducingEvaluator::new(
            seed_fn(|_: &()| String::new()),
            fold_fn(|_, acc: String, v: &&str| acc + *v),
            combine_fn(|_, a: String, b: String| a + &b),
        );
        let mut entries = OrderedAccumulator::new();
        entries.insert(20i64, "b");
        entries.insert(10i64, "a");
        entries.insert(20i64, "c");
        assert_eq!(evaluator.evaluate(&(), &entries).unwrap(), "abc");
    }
}
