//! Window specification
//!
//! A [`WindowSpec`] is the configuration surface of a keyed window engine:
//! per-key factories for the assigner, trigger and eviction strategy, the
//! seed/fold/combine functions, durability, and serialization forms. It picks
//! one of three pane configurations per key:
//!
//! - no eviction: folded single value, emitted as is
//! - eviction without combiner: timestamped sequence, re-folded on evaluation
//! - eviction with combiner: criterion-ordered map, folded per entry and combined

use crate::timestamps::TimestampAssigner;
use paneflow_core::{Data, KeyData, Result, StreamError, TimestampMs};
use paneflow_state::{
    AccumulatorStore, Discriminator, DurableAccumulators, PaneAccumulator, PersistenceProvider,
    StateForms, StateTag, TransientAccumulators, WindowStates,
};
use paneflow_windows::{
    CombineFn, DefaultPaneManager, EvictionStrategy, Evictor, FoldFn, FoldPaneUpdater,
    FoldingEvaluator, IdentityEvaluator, MapPaneUpdater, MapThresholdEvictor, NoOpEvictor,
    PaneEvaluator, PaneManager, PaneUpdater, ReducingEvaluator, SeedFn, SequencePaneUpdater,
    SequenceThresholdEvictor, Trigger, WindowAssigner,
};
use std::sync::Arc;
use tracing::debug;

pub type AssignerFactory<K, T, W> = Arc<dyn Fn(&K) -> Box<dyn WindowAssigner<T, W>> + Send + Sync>;
pub type TriggerFactory<K, G> = Arc<dyn Fn(&K) -> G + Send + Sync>;
pub type EvictionFactory<K, T, C> = Arc<dyn Fn(&K) -> EvictionStrategy<T, C> + Send + Sync>;
pub type KeyedSeedFn<K, W, U> = Arc<dyn Fn(&K, &W) -> Result<U> + Send + Sync>;
pub type KeyedFoldFn<K, W, U, T> = Arc<dyn Fn(&K, &W, U, &T) -> Result<U> + Send + Sync>;
pub type KeyedCombineFn<K, W, U> = Arc<dyn Fn(&K, &W, U, U) -> Result<U> + Send + Sync>;

/// Configuration of a keyed window engine.
///
/// `G` is the trigger type and `C` the eviction criterion.
pub struct WindowSpec<K, T, W, U, G, C = TimestampMs> {
    stream_id: String,
    assigner: AssignerFactory<K, T, W>,
    trigger: TriggerFactory<K, G>,
    eviction: EvictionFactory<K, T, C>,
    seed: KeyedSeedFn<K, W, U>,
    fold: KeyedFoldFn<K, W, U, T>,
    combine: Option<KeyedCombineFn<K, W, U>>,
    durable: bool,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    forms: StateForms,
    timestamps: TimestampAssigner<T>,
}

impl<K, T, W, U, G> WindowSpec<K, T, W, U, G>
where
    K: KeyData,
    T: Data,
    W: Data + Ord,
    U: Data,
    G: Trigger<T, W> + 'static,
{
    /// A transient spec without eviction
    pub fn new(
        stream_id: impl Into<String>,
        assigner: impl Fn(&K) -> Box<dyn WindowAssigner<T, W>> + Send + Sync + 'static,
        trigger: impl Fn(&K) -> G + Send + Sync + 'static,
        seed: impl Fn(&K, &W) -> U + Send + Sync + 'static,
        fold: impl Fn(&K, &W, U, &T) -> U + Send + Sync + 'static,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            assigner: Arc::new(assigner),
            trigger: Arc::new(trigger),
            eviction: Arc::new(|_: &K| EvictionStrategy::None),
            seed: Arc::new(move |k: &K, w: &W| Ok(seed(k, w))),
            fold: Arc::new(move |k: &K, w: &W, acc: U, v: &T| Ok(fold(k, w, acc, v))),
            combine: None,
            durable: false,
            persistence: None,
            forms: StateForms::of::<W, U>(),
            timestamps: TimestampAssigner::Clock,
        }
    }
}

impl<K, T, W, U, G, C> WindowSpec<K, T, W, U, G, C>
where
    K: KeyData,
    T: Data,
    W: Data + Ord,
    U: Data,
    G: Trigger<T, W> + 'static,
    C: Data + Ord,
{
    /// Choose the eviction strategy of each key
    pub fn with_eviction<C2>(
        self,
        eviction: impl Fn(&K) -> EvictionStrategy<T, C2> + Send + Sync + 'static,
    ) -> WindowSpec<K, T, W, U, G, C2> {
        WindowSpec {
            stream_id: self.stream_id,
            assigner: self.assigner,
            trigger: self.trigger,
            eviction: Arc::new(eviction),
            seed: self.seed,
            fold: self.fold,
            combine: self.combine,
            durable: self.durable,
            persistence: self.persistence,
            forms: self.forms,
            timestamps: self.timestamps,
        }
    }

    /// Replace the seed with a fallible one
    pub fn with_try_seed(mut self, seed: impl Fn(&K, &W) -> Result<U> + Send + Sync + 'static) -> Self {
        self.seed = Arc::new(seed);
        self
    }

    /// Replace the fold with a fallible one
    pub fn with_try_fold(
        mut self,
        fold: impl Fn(&K, &W, U, &T) -> Result<U> + Send + Sync + 'static,
    ) -> Self {
        self.fold = Arc::new(fold);
        self
    }

    /// Associative merge enabling incremental eviction
    pub fn with_combiner(mut self, combine: impl Fn(&K, &W, U, U) -> U + Send + Sync + 'static) -> Self {
        self.combine = Some(Arc::new(move |k: &K, w: &W, a: U, b: U| Ok(combine(k, w, a, b))));
        self
    }

    pub fn with_try_combiner(
        mut self,
        combine: impl Fn(&K, &W, U, U) -> Result<U> + Send + Sync + 'static,
    ) -> Self {
        self.combine = Some(Arc::new(combine));
        self
    }

    /// Mirror all state through `persistence`
    pub fn durable(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.durable = true;
        self.persistence = Some(persistence);
        self
    }

    /// Set the durability flag; a durable spec also needs a persistence provider
    pub fn with_durability(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_forms(mut self, forms: StateForms) -> Self {
        self.forms = forms;
        self
    }

    pub fn with_timestamps(mut self, timestamps: TimestampAssigner<T>) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn timestamps(&self) -> &TimestampAssigner<T> {
        &self.timestamps
    }

    /// Persistence provider of a durable spec
    pub fn persistence(&self) -> Option<&Arc<dyn PersistenceProvider>> {
        if self.durable {
            self.persistence.as_ref()
        } else {
            None
        }
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        StateTag::stream(&self.stream_id, Discriminator::Keys)?;
        self.forms.validate()?;
        if self.durable && self.persistence.is_none() {
            return Err(StreamError::Configuration(format!(
                "stream '{}' is durable but has no persistence provider",
                self.stream_id
            )));
        }
        Ok(())
    }

    /// Build the pane manager of `key`
    pub fn create_manager(&self, key: &K) -> Result<Box<dyn PaneManager<T, W, U>>> {
        let seed: SeedFn<W, U> = {
            let key = key.clone();
            let seed = self.seed.clone();
            Arc::new(move |w: &W| seed(&key, w))
        };
        let fold: FoldFn<W, U, T> = {
            let key = key.clone();
            let fold = self.fold.clone();
            Arc::new(move |w: &W, acc: U, v: &T| fold(&key, w, acc, v))
        };

        match (self.eviction)(key) {
            EvictionStrategy::None => self.assemble(
                key,
                Discriminator::Value,
                &self.forms,
                Box::new(FoldPaneUpdater::new(seed, fold)),
                Box::new(NoOpEvictor),
                Box::new(IdentityEvaluator),
            ),
            EvictionStrategy::Threshold(threshold) => {
                threshold.validate()?;
                match &self.combine {
                    None => self.assemble(
                        key,
                        Discriminator::Sequence,
                        &self.forms,
                        Box::new(SequencePaneUpdater),
                        Box::new(SequenceThresholdEvictor::new(&threshold)),
                        Box::new(FoldingEvaluator::new(seed, fold)),
                    ),
                    Some(combine) => {
                        let combine: CombineFn<W, U> = {
                            let key = key.clone();
                            let combine = combine.clone();
                            Arc::new(move |w: &W, a: U, b: U| combine(&key, w, a, b))
                        };
                        let forms = self
                            .forms
                            .clone()
                            .with_criterion(threshold.criterion_form());
                        forms.validate()?;
                        self.assemble(
                            key,
                            Discriminator::OrderedMap,
                            &forms,
                            Box::new(MapPaneUpdater::new(&threshold)),
                            Box::new(MapThresholdEvictor::new(&threshold)),
                            Box::new(ReducingEvaluator::new(seed, fold, combine)),
                        )
                    }
                }
            }
        }
    }

    fn assemble<A: PaneAccumulator>(
        &self,
        key: &K,
        discriminator: Discriminator,
        forms: &StateForms,
        updater: Box<dyn PaneUpdater<T, W, A>>,
        evictor: Box<dyn Evictor<W, A>>,
        evaluator: Box<dyn PaneEvaluator<W, A, U>>,
    ) -> Result<Box<dyn PaneManager<T, W, U>>> {
        let manager = DefaultPaneManager::new(
            (self.assigner)(key),
            Box::new((self.trigger)(key)),
            updater,
            evictor,
            evaluator,
        );
        let manager = match self.persistence() {
            Some(persistence) => {
                let base = StateTag::keyed(&self.stream_id, key, discriminator, forms)?;
                let windows =
                    StateTag::keyed(&self.stream_id, key, Discriminator::WindowState, forms)?;
                let accumulators: Box<dyn AccumulatorStore<W, A>> =
                    Box::new(DurableAccumulators::new(persistence.clone(), base));
                manager
                    .with_accumulators(accumulators)
                    .with_window_states(WindowStates::durable(persistence.clone(), windows)?)
            }
            None => manager.with_accumulators(Box::new(TransientAccumulators::new())),
        };
        debug!(
            "Created {} pane manager for stream '{}'",
            discriminator.as_str(),
            self.stream_id
        );
        Ok(Box::new(manager))
    }
}
