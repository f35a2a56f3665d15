//! Triggers decide when a pane emits
//!
//! A trigger keeps a small serializable state per open window. It is consulted
//! on every element and on every timer the engine arms for the deadline it
//! reports.

use crate::window::BoundedWindow;
use paneflow_core::{Data, Result, StreamError, TimestampMs};
use serde::{Deserialize, Serialize};

/// Outcome of a trigger decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Keep accumulating
    Continue,
    /// Emit and keep the pane (sliding semantics)
    Fire,
    /// Emit and discard the pane (tumbling semantics)
    FireAndPurge,
    /// Discard the pane without emitting
    Purge,
}

impl TriggerAction {
    pub fn fires(&self) -> bool {
        matches!(self, TriggerAction::Fire | TriggerAction::FireAndPurge)
    }

    pub fn purges(&self) -> bool {
        matches!(self, TriggerAction::FireAndPurge | TriggerAction::Purge)
    }
}

/// Emission policy for a window
pub trait Trigger<T, W>: Send + Sync {
    /// Per-window trigger state
    type State: Data;

    /// State of a window seen for the first time at scheduler time `now`
    fn init(&self, window: &W, now: TimestampMs) -> Self::State;

    /// Called for every element assigned to the window
    fn on_element(
        &self,
        window: &W,
        state: &mut Self::State,
        value: &T,
        timestamp: TimestampMs,
    ) -> Result<TriggerAction>;

    /// Called when the scheduler clock reaches the reported deadline
    fn on_timer(&self, _window: &W, _state: &mut Self::State, _now: TimestampMs) -> Result<TriggerAction> {
        Ok(TriggerAction::Continue)
    }

    /// Scheduler time at which `on_timer` should run next, if any
    fn deadline(&self, _window: &W, _state: &Self::State) -> Option<TimestampMs> {
        None
    }
}

/// Fires every `count` elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountTrigger {
    count: u64,
    purge: bool,
}

impl CountTrigger {
    pub fn new(count: u64) -> Result<Self> {
        if count == 0 {
            return Err(StreamError::Configuration(
                "count trigger needs a positive count".to_string(),
            ));
        }
        Ok(Self {
            count,
            purge: false,
        })
    }

    /// Discard the pane after each emission
    pub fn purging(mut self) -> Self {
        self.purge = true;
        self
    }
}

impl<T, W> Trigger<T, W> for CountTrigger {
    type State = u64;

    fn init(&self, _window: &W, _now: TimestampMs) -> u64 {
        0
    }

    fn on_element(&self, _window: &W, seen: &mut u64, _value: &T, _timestamp: TimestampMs) -> Result<TriggerAction> {
        *seen += 1;
        if *seen < self.count {
            return Ok(TriggerAction::Continue);
        }
        *seen = 0;
        Ok(if self.purge {
            TriggerAction::FireAndPurge
        } else {
            TriggerAction::Fire
        })
    }
}

/// Fires once, discarding the pane, when the clock reaches the window end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndOfWindowTrigger;

impl<T, W: BoundedWindow> Trigger<T, W> for EndOfWindowTrigger {
    type State = ();

    fn init(&self, _window: &W, _now: TimestampMs) {}

    fn on_element(&self, _window: &W, _state: &mut (), _value: &T, _timestamp: TimestampMs) -> Result<TriggerAction> {
        Ok(TriggerAction::Continue)
    }

    fn on_timer(&self, window: &W, _state: &mut (), now: TimestampMs) -> Result<TriggerAction> {
        match window.end_time() {
            Some(end) if now >= end => Ok(TriggerAction::FireAndPurge),
            _ => Ok(TriggerAction::Continue),
        }
    }

    fn deadline(&self, window: &W, _state: &()) -> Option<TimestampMs> {
        window.end_time()
    }
}

/// What a periodic trigger does on a tick with no new elements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Emit the unchanged aggregate again
    Refire,
    /// Stay silent until new elements arrive
    #[default]
    Suppress,
}

/// State of a [`PeriodicTrigger`] window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicState {
    pub next_fire: TimestampMs,
    pub dirty: bool,
}

/// Re-emits a pane every `period_ms` while it is open.
///
/// The pane is kept across emissions. Bounded windows are discarded when the
/// clock reaches their end, with a final emission if the policy calls for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTrigger {
    period_ms: i64,
    idle: IdlePolicy,
}

impl PeriodicTrigger {
    pub fn new(period_ms: i64) -> Result<Self> {
        if period_ms <= 0 {
            return Err(StreamError::Configuration(format!(
                "periodic trigger needs a positive period, got {}",
                period_ms
            )));
        }
        Ok(Self {
            period_ms,
            idle: IdlePolicy::default(),
        })
    }

    pub fn with_idle_policy(mut self, idle: IdlePolicy) -> Self {
        self.idle = idle;
        self
    }

    pub fn idle_policy(&self) -> IdlePolicy {
        self.idle
    }

    fn emission(&self, state: &mut PeriodicState) -> bool {
        let emit = state.dirty || self.idle == IdlePolicy::Refire;
        state.dirty = false;
        emit
    }
}

impl<T, W: BoundedWindow> Trigger<T, W> for PeriodicTrigger {
    type State = PeriodicState;

    fn init(&self, _window: &W, now: TimestampMs) -> PeriodicState {
        PeriodicState {
            next_fire: now.saturating_add(self.period_ms),
            dirty: false,
        }
    }

    fn on_element(&self, _window: &W, state: &mut PeriodicState, _value: &T, _timestamp: TimestampMs) -> Result<TriggerAction> {
        state.dirty = true;
        Ok(TriggerAction::Continue)
    }

    fn on_timer(&self, window: &W, state: &mut PeriodicState, now: TimestampMs) -> Result<TriggerAction> {
        if let Some(end) = window.end_time() {
            if now >= end {
                return Ok(if self.emission(state) {
                    TriggerAction::FireAndPurge
                } else {
                    TriggerAction::Purge
                });
            }
        }
        if now < state.next_fire {
            return Ok(TriggerAction::Continue);
        }
        state.next_fire = now.saturating_add(self.period_ms);
        Ok(if self.emission(state) {
            TriggerAction::Fire
        } else {
            TriggerAction::Continue
        })
    }

    fn deadline(&self, window: &W, state: &PeriodicState) -> Option<TimestampMs> {
        match window.end_time() {
            Some(end) => Some(end.min(state.next_fire)),
            None => Some(state.next_fire),
        }
    }
}

/// Trigger kinds constructible from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Count {
        count: u64,
        #[serde(default)]
        purge: bool,
    },
    EndOfWindow,
    Periodic {
        period_ms: i64,
        #[serde(default)]
        idle: IdlePolicy,
    },
}

/// State of a [`TriggerKind`] window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerKindState {
    Count(u64),
    EndOfWindow,
    Periodic(PeriodicState),
}

impl TriggerKind {
    /// Reject parameters the concrete trigger would reject
    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerKind::Count { count, .. } => CountTrigger::new(*count).map(|_| ()),
            TriggerKind::EndOfWindow => Ok(()),
            TriggerKind::Periodic { period_ms, .. } => PeriodicTrigger::new(*period_ms).map(|_| ()),
        }
    }

    fn count(&self) -> Result<CountTrigger> {
        match self {
            TriggerKind::Count { count, purge } => {
                let trigger = CountTrigger::new(*count)?;
                Ok(if *purge { trigger.purging() } else { trigger })
            }
            _ => Err(self.mismatch()),
        }
    }

    fn periodic(&self) -> Result<PeriodicTrigger> {
        match self {
            TriggerKind::Periodic { period_ms, idle } => {
                Ok(PeriodicTrigger::new(*period_ms)?.with_idle_policy(*idle))
            }
            _ => Err(self.mismatch()),
        }
    }

    fn mismatch(&self) -> StreamError {
        StreamError::Configuration(format!("trigger state does not belong to {:?}", self))
    }
}

impl<T, W: BoundedWindow> Trigger<T, W> for TriggerKind {
    type State = TriggerKindState;

    fn init(&self, _window: &W, now: TimestampMs) -> TriggerKindState {
        match self {
            TriggerKind::Count { .. } => TriggerKindState::Count(0),
            TriggerKind::EndOfWindow => TriggerKindState::EndOfWindow,
            TriggerKind::Periodic { period_ms, .. } => TriggerKindState::Periodic(PeriodicState {
                next_fire: now.saturating_add(*period_ms),
                dirty: false,
            }),
        }
    }

    fn on_element(
        &self,
        window: &W,
        state: &mut TriggerKindState,
        value: &T,
        timestamp: TimestampMs,
    ) -> Result<TriggerAction> {
        match state {
            TriggerKindState::Count(seen) => {
                Trigger::<T, W>::on_element(&self.count()?, window, seen, value, timestamp)
            }
            TriggerKindState::EndOfWindow => Ok(TriggerAction::Continue),
            TriggerKindState::Periodic(periodic) => {
                Trigger::<T, W>::on_element(&self.periodic()?, window, periodic, value, timestamp)
            }
        }
    }

    fn on_timer(&self, window: &W, state: &mut TriggerKindState, now: TimestampMs) -> Result<TriggerAction> {
        match state {
            TriggerKindState::Count(_) => Ok(TriggerAction::Continue),
            TriggerKindState::EndOfWindow => {
                Trigger::<T, W>::on_timer(&EndOfWindowTrigger, window, &mut (), now)
            }
            TriggerKindState::Periodic(periodic) => {
                Trigger::<T, W>::on_timer(&self.periodic()?, window, periodic, now)
            }
        }
    }

    fn deadline(&self, window: &W, state: &TriggerKindState) -> Option<TimestampMs> {
        match state {
            TriggerKindState::Count(_) => None,
            TriggerKindState::EndOfWindow => window.end_time(),
            TriggerKindState::Periodic(periodic) => Some(match window.end_time() {
                Some(end) => end.min(periodic.next_fire),
                None => periodic.next_fire,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{GlobalWindow, TimeInterval};

    fn on_element<G: Trigger<f64, TimeInterval>>(trigger: &G, state: &mut G::State) -> TriggerAction {
        trigger
            .on_element(&TimeInterval::new(0, 100), state, &1.0, 0)
            .unwrap()
    }

    #[test]
    fn test_count_trigger_fires_every_n() {
        let trigger = CountTrigger::new(3).unwrap();
        let mut seen = Trigger::<f64, TimeInterval>::init(&trigger, &TimeInterval::new(0, 100), 0);

        assert_eq!(on_element(&trigger, &mut seen), TriggerAction::Continue);
        assert_eq!(on_element(&trigger, &mut seen), TriggerAction::Continue);
        assert_eq!(on_element(&trigger, &mut seen), TriggerAction::Fire);
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_count_trigger_purging() {
        let trigger = CountTrigger::new(1).unwrap().purging();
        let mut seen = 0;
        assert_eq!(on_element(&trigger, &mut seen), TriggerAction::FireAndPurge);
        assert!(CountTrigger::new(0).is_err());
    }

    #[test]
    fn test_end_of_window_deadline() {
        let window = TimeInterval::new(0, 10);
        let trigger = EndOfWindowTrigger;

        assert_eq!(Trigger::<f64, _>::deadline(&trigger, &window, &()), Some(10));
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut (), 9).unwrap(),
            TriggerAction::Continue
        );
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut (), 10).unwrap(),
            TriggerAction::FireAndPurge
        );
    }

    #[test]
    fn test_periodic_suppresses_idle_ticks() {
        let window = GlobalWindow;
        let trigger = PeriodicTrigger::new(5).unwrap();
        let mut state = Trigger::<f64, _>::init(&trigger, &window, 0);
        assert_eq!(Trigger::<f64, _>::deadline(&trigger, &window, &state), Some(5));

        Trigger::<f64, _>::on_element(&trigger, &window, &mut state, &1.0, 1).unwrap();
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut state, 5).unwrap(),
            TriggerAction::Fire
        );
        assert_eq!(state.next_fire, 10);
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut state, 10).unwrap(),
            TriggerAction::Continue
        );
    }

    #[test]
    fn test_periodic_deadline_saturates() {
        let window = GlobalWindow;
        let trigger = PeriodicTrigger::new(5).unwrap();
        let mut state = Trigger::<f64, _>::init(&trigger, &window, i64::MAX - 1);
        assert_eq!(state.next_fire, i64::MAX);

        Trigger::<f64, _>::on_element(&trigger, &window, &mut state, &1.0, i64::MAX).unwrap();
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut state, i64::MAX).unwrap(),
            TriggerAction::Fire
        );
        assert_eq!(state.next_fire, i64::MAX);
    }

    #[test]
    fn test_periodic_refire_policy() {
        let window = GlobalWindow;
        let trigger = PeriodicTrigger::new(5)
            .unwrap()
            .with_idle_policy(IdlePolicy::Refire);
        let mut state = Trigger::<f64, _>::init(&trigger, &window, 0);
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut state, 5).unwrap(),
            TriggerAction::Fire
        );
    }

    #[test]
    fn test_periodic_purges_at_window_end() {
        let window = TimeInterval::new(0, 8);
        let trigger = PeriodicTrigger::new(5).unwrap();
        let mut state = Trigger::<f64, _>::init(&trigger, &window, 0);
        Trigger::<f64, _>::on_element(&trigger, &window, &mut state, &1.0, 0).unwrap();

        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut state, 5).unwrap(),
            TriggerAction::Fire
        );
        assert_eq!(Trigger::<f64, _>::deadline(&trigger, &window, &state), Some(8));
        assert_eq!(
            Trigger::<f64, _>::on_timer(&trigger, &window, &mut state, 8).unwrap(),
            TriggerAction::Purge
        );
    }

    #[test]
    fn test_trigger_kind_delegates() {
        let kind: TriggerKind =
            serde_json::from_str(r#"{"type":"count","count":2,"purge":true}"#).unwrap();
        kind.validate().unwrap();
        let mut state = Trigger::<f64, _>::init(&kind, &TimeInterval::new(0, 10), 0);

        assert_eq!(on_element(&kind, &mut state), TriggerAction::Continue);
        assert_eq!(on_element(&kind, &mut state), TriggerAction::FireAndPurge);

        let end: TriggerKind = serde_json::from_str(r#"{"type":"end_of_window"}"#).unwrap();
        let state = Trigger::<f64, _>::init(&end, &TimeInterval::new(0, 10), 0);
        assert_eq!(
            Trigger::<f64, _>::deadline(&end, &TimeInterval::new(0, 10), &state),
            Some(10)
        );
    }
}
