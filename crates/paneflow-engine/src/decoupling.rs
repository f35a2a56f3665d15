//! Temporal decoupling
//!
//! A [`TemporalDecoupler`] sits between a delta source and its consumers and
//! emits on its own clock instead of on arrival:
//!
//! - `Discrete` treats input as edges: a tick emits, for every key that
//!   changed since the previous tick, the most recent delta of that key.
//!   Quiet ticks emit nothing.
//! - `Continuous` treats input as levels: every tick emits the whole current
//!   snapshot, preceded by removals seen since the previous tick.
//!
//! The decoupler is either armed, with exactly one live timer, or disarmed.
//! Each arming bumps a generation counter and a tick only acts when it
//! carries the current generation, so a callback racing a rearm or a close
//! is a no-op.

use crate::schedule::{Scheduler, TimerHandle};
use crate::source::{DeltaSink, DeltaSource, Junction};
use crate::stats::DecouplerStats;
use paneflow_core::{Data, Delta, KeyData, Result, StreamError};
use paneflow_state::{Discriminator, PersistenceProvider, StateTag, ValueCell};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// How input deltas are interpreted at a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    #[default]
    Discrete,
    Continuous,
}

/// Emission rate of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sampling {
    /// Pass every delta through as it arrives
    #[default]
    Eager,
    /// Tick at a fixed period
    Constant { period_ms: u64 },
    /// Tick at a period that can be changed while running
    Dynamic { initial_ms: u64 },
}

impl Sampling {
    pub fn is_eager(&self) -> bool {
        matches!(self, Sampling::Eager)
    }
}

/// Configuration of a temporal decoupler
#[derive(Debug, Clone)]
pub struct DecouplerConfig {
    stream_id: String,
    interpretation: Interpretation,
    sampling: Sampling,
    persistence: Option<Arc<dyn PersistenceProvider>>,
}

impl DecouplerConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            interpretation: Interpretation::default(),
            sampling: Sampling::default(),
            persistence: None,
        }
    }

    pub fn with_interpretation(mut self, interpretation: Interpretation) -> Self {
        self.interpretation = interpretation;
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Persist the active dynamic period through `persistence`
    pub fn durable(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn sampling(&self) -> Sampling {
        self.sampling
    }

    pub fn interpretation(&self) -> Interpretation {
        self.interpretation
    }

    pub fn validate(&self) -> Result<()> {
        StateTag::stream(&self.stream_id, Discriminator::Period)?;
        match self.sampling {
            Sampling::Constant { period_ms: 0 } | Sampling::Dynamic { initial_ms: 0 } => {
                Err(StreamError::Configuration(format!(
                    "stream '{}' needs a positive sampling period",
                    self.stream_id
                )))
            }
            _ => Ok(()),
        }
    }
}

enum Phase {
    Armed { generation: u64, handle: TimerHandle },
    Disarmed,
}

struct DecouplerState<K, V> {
    phase: Phase,
    generation: u64,
    period_ms: u64,
    /// Latest delta of every key changed since the last tick, oldest first
    pending: Vec<Delta<K, V>>,
    snapshot: HashMap<K, V>,
    removed: Vec<K>,
}

struct DecouplerInner<K, V> {
    stream_id: String,
    interpretation: Interpretation,
    dynamic: bool,
    scheduler: Arc<dyn Scheduler>,
    period: Option<ValueCell<u64>>,
    state: Mutex<DecouplerState<K, V>>,
    output: Junction<K, V>,
    stats: DecouplerStats,
}

/// Re-emits a delta stream on a timer
pub struct TemporalDecoupler<K, V> {
    inner: Arc<DecouplerInner<K, V>>,
}

impl<K, V> Clone for TemporalDecoupler<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: KeyData, V: Data> TemporalDecoupler<K, V> {
    /// Validate `config` and arm the first tick.
    ///
    /// A durable dynamic decoupler resumes the last persisted period.
    pub fn new(config: DecouplerConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        config.validate()?;
        let (period_ms, dynamic) = match config.sampling {
            Sampling::Eager => {
                return Err(StreamError::Configuration(format!(
                    "stream '{}' samples eagerly and needs no decoupler",
                    config.stream_id
                )))
            }
            Sampling::Constant { period_ms } => (period_ms, false),
            Sampling::Dynamic { initial_ms } => (initial_ms, true),
        };
        let period = match (&config.persistence, dynamic) {
            (Some(persistence), true) => Some(ValueCell::new(
                persistence.clone(),
                StateTag::stream(&config.stream_id, Discriminator::Period)?,
                period_ms,
            )),
            _ => None,
        };
        let period_ms = match &period {
            Some(cell) => cell.get()?,
            None => period_ms,
        };

        let inner = Arc::new(DecouplerInner {
            stream_id: config.stream_id,
            interpretation: config.interpretation,
            dynamic,
            scheduler,
            period,
            state: Mutex::new(DecouplerState {
                phase: Phase::Disarmed,
                generation: 0,
                period_ms,
                pending: Vec::new(),
                snapshot: HashMap::new(),
                removed: Vec::new(),
            }),
            output: Junction::new(),
            stats: DecouplerStats::new(),
        });
        {
            let mut state = inner.state.lock();
            inner.arm(&mut state);
        }
        info!(
            "Armed {:?} decoupler '{}' every {}ms",
            inner.interpretation, inner.stream_id, period_ms
        );
        Ok(Self { inner })
    }

    /// Record a delta for the next tick
    pub fn on_delta(&self, delta: Delta<K, V>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if matches!(state.phase, Phase::Disarmed) {
            return Err(StreamError::StreamClosed(format!(
                "decoupler '{}' is disarmed",
                self.inner.stream_id
            )));
        }
        self.inner.stats.record_received();
        match self.inner.interpretation {
            Interpretation::Discrete => {
                state.pending.retain(|pending| pending.key() != delta.key());
                state.pending.push(delta);
            }
            Interpretation::Continuous => match delta {
                Delta::Update { key, value } => {
                    state.removed.retain(|removed| removed != &key);
                    state.snapshot.insert(key, value);
                }
                Delta::Remove { key } => {
                    if state.snapshot.remove(&key).is_some() && !state.removed.contains(&key) {
                        state.removed.push(key);
                    }
                }
            },
        }
        Ok(())
    }

    /// Change the period of a dynamic decoupler and rearm from now
    pub fn set_period(&self, period_ms: u64) -> Result<()> {
        if !self.inner.dynamic {
            return Err(StreamError::Configuration(format!(
                "decoupler '{}' has a constant period",
                self.inner.stream_id
            )));
        }
        if period_ms == 0 {
            return Err(StreamError::Configuration(
                "sampling period must be positive".to_string(),
            ));
        }
        let mut state = self.inner.state.lock();
        if matches!(state.phase, Phase::Disarmed) {
            return Err(StreamError::StreamClosed(format!(
                "decoupler '{}' is disarmed",
                self.inner.stream_id
            )));
        }
        if let Some(cell) = &self.inner.period {
            cell.set(&period_ms)?;
        }
        state.period_ms = period_ms;
        self.inner.arm(&mut state);
        debug!(
            "Decoupler '{}' period changed to {}ms",
            self.inner.stream_id, period_ms
        );
        Ok(())
    }

    /// Sink that feeds period updates into [`set_period`](Self::set_period)
    pub fn period_control(&self) -> PeriodControl<K, V> {
        PeriodControl {
            decoupler: self.clone(),
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.inner.state.lock().period_ms
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Armed { .. })
    }

    /// Cancel the timer; later ticks and deltas are ignored
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if let Phase::Armed { handle, .. } = std::mem::replace(&mut state.phase, Phase::Disarmed) {
            handle.cancel();
            info!("Disarmed decoupler '{}'", self.inner.stream_id);
        }
    }

    pub fn stats(&self) -> &DecouplerStats {
        &self.inner.stats
    }
}

impl<K: KeyData, V: Data> DecouplerInner<K, V> {
    /// Replace any live timer with one a full period from now
    fn arm(self: &Arc<Self>, state: &mut DecouplerState<K, V>) {
        if let Phase::Armed { handle, .. } = &state.phase {
            handle.cancel();
        }
        state.generation += 1;
        let generation = state.generation;
        let decoupler: Weak<Self> = Arc::downgrade(self);
        let handle = self.scheduler.arm(
            Duration::from_millis(state.period_ms),
            Box::new(move || {
                if let Some(decoupler) = decoupler.upgrade() {
                    decoupler.tick(generation);
                }
            }),
        );
        state.phase = Phase::Armed { generation, handle };
    }

    fn tick(self: &Arc<Self>, generation: u64) {
        let emissions = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Armed { generation: current, .. } if current == generation => {}
                _ => {
                    self.stats.record_stale_tick();
                    return;
                }
            }
            let emissions: Vec<Delta<K, V>> = match self.interpretation {
                Interpretation::Discrete => std::mem::take(&mut state.pending),
                Interpretation::Continuous => {
                    let mut emissions: Vec<_> = state.removed.drain(..).map(Delta::remove).collect();
                    emissions.extend(
                        state
                            .snapshot
                            .iter()
                            .map(|(key, value)| Delta::update(key.clone(), value.clone())),
                    );
                    emissions
                }
            };
            self.arm(&mut state);
            emissions
        };

        self.stats.record_tick(emissions.len() as u64);
        for delta in emissions {
            if let Err(e) = self.output.publish(delta) {
                debug!("Decoupler '{}' downstream rejected a delta: {}", self.stream_id, e);
            }
        }
    }
}

impl<K: KeyData, V: Data> DeltaSink<K, V> for TemporalDecoupler<K, V> {
    fn accept(&self, delta: Delta<K, V>) -> Result<()> {
        self.on_delta(delta)
    }
}

impl<K: KeyData, V: Data> DeltaSource<K, V> for TemporalDecoupler<K, V> {
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>) {
        self.inner.output.subscribe(sink);
    }
}

/// Period stream of a dynamic decoupler.
///
/// Every update sets the period; removals keep the current one.
pub struct PeriodControl<K, V> {
    decoupler: TemporalDecoupler<K, V>,
}

impl<CK, K: KeyData, V: Data> DeltaSink<CK, u64> for PeriodControl<K, V> {
    fn accept(&self, delta: Delta<CK, u64>) -> Result<()> {
        match delta {
            Delta::Update { value, .. } => self.decoupler.set_period(value),
            Delta::Remove { .. } => Ok(()),
        }
    }
}

/// A source as seen by its consumers after sampling
pub enum Sampled<K, V> {
    Eager(Arc<dyn DeltaSource<K, V>>),
    Decoupled(TemporalDecoupler<K, V>),
}

impl<K, V> Sampled<K, V> {
    pub fn decoupler(&self) -> Option<&TemporalDecoupler<K, V>> {
        match self {
            Sampled::Eager(_) => None,
            Sampled::Decoupled(decoupler) => Some(decoupler),
        }
    }
}

impl<K: KeyData, V: Data> DeltaSource<K, V> for Sampled<K, V> {
    fn subscribe(&self, sink: Arc<dyn DeltaSink<K, V>>) {
        match self {
            Sampled::Eager(source) => source.subscribe(sink),
            Sampled::Decoupled(decoupler) => decoupler.subscribe(sink),
        }
    }
}

/// Apply `config`'s sampling to `source`; eager sampling returns it unchanged
pub fn sample<K: KeyData, V: Data>(
    source: Arc<dyn DeltaSource<K, V>>,
    config: DecouplerConfig,
    scheduler: Arc<dyn Scheduler>,
) -> Result<Sampled<K, V>> {
    if config.sampling().is_eager() {
        config.validate()?;
        return Ok(Sampled::Eager(source));
    }
    let decoupler = TemporalDecoupler::new(config, scheduler)?;
    source.subscribe(Arc::new(decoupler.clone()));
    Ok(Sampled::Decoupled(decoupler))
}
