//! Scheduler capability
//!
//! Triggers and decouplers arm one-shot timers through a [`Scheduler`].
//! Cancelling a timer and the timer firing race on a single atomic state, so
//! exactly one of them wins.

use paneflow_core::{Result, StreamError, TimestampMs};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tracing::trace;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Callback run when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Arms one-shot timers against a millisecond clock
pub trait Scheduler: Send + Sync {
    /// Current time in milliseconds
    fn now(&self) -> TimestampMs;

    /// Run `callback` once after `delay` unless the handle is cancelled first
    fn arm(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Cancellable handle of an armed timer
#[derive(Clone, Default)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the timer; false if it already fired or was cancelled
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the right to run the callback; false if cancelled or already fired
    pub fn begin_fire(&self) -> bool {
        self.state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            PENDING => "pending",
            FIRED => "fired",
            _ => "cancelled",
        };
        f.debug_struct("TimerHandle").field("state", &state).finish()
    }
}

/// Wall-clock scheduler backed by tokio timers
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Scheduler on the runtime of the calling task
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| StreamError::Scheduler(format!("no tokio runtime: {}", e)))?;
        Ok(Self { handle })
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as TimestampMs)
            .unwrap_or_default()
    }

    fn arm(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let timer = TimerHandle::new();
        let armed = timer.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if armed.begin_fire() {
                callback();
            }
        });
        timer
    }
}

struct ManualTimer {
    handle: TimerHandle,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualState {
    now: TimestampMs,
    next_seq: u64,
    timers: BTreeMap<(TimestampMs, u64), ManualTimer>,
}

/// Scheduler with a virtual clock that only moves when told to.
///
/// Timers fire in deadline order, then in arming order. Callbacks run on the
/// caller's thread without the scheduler lock held, so they may arm new
/// timers.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: TimestampMs) -> Self {
        let scheduler = Self::new();
        scheduler.state.lock().now = now;
        scheduler
    }

    /// Move the clock forward without firing anything
    pub fn set_time(&self, now: TimestampMs) {
        let mut state = self.state.lock();
        state.now = state.now.max(now);
    }

    /// Fire every timer due at the current time; returns how many ran
    pub fn fire_due(&self) -> usize {
        let now = self.state.lock().now;
        self.fire_until(now)
    }

    /// Fire timers in deadline order up to `target`, moving the clock to each
    /// deadline before its timer runs
    pub fn advance_to(&self, target: TimestampMs) -> usize {
        let fired = self.fire_until(target);
        self.set_time(target);
        fired
    }

    pub fn advance_by(&self, delta: Duration) -> usize {
        let target = self.now().saturating_add(millis(delta));
        self.advance_to(target)
    }

    /// Earliest deadline of a timer that is still pending
    pub fn next_deadline(&self) -> Option<TimestampMs> {
        let state = self.state.lock();
        state
            .timers
            .iter()
            .find(|(_, timer)| timer.handle.is_pending())
            .map(|((due, _), _)| *due)
    }

    /// Number of timers that are neither fired nor cancelled
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state
            .timers
            .values()
            .filter(|timer| timer.handle.is_pending())
            .count()
    }

    fn fire_until(&self, target: TimestampMs) -> usize {
        let mut fired = 0;
        loop {
            let timer = {
                let mut state = self.state.lock();
                let key = match state.timers.keys().next() {
                    Some(&(due, seq)) if due <= target => (due, seq),
                    _ => break,
                };
                state.now = state.now.max(key.0);
                state.timers.remove(&key)
            };
            if let Some(timer) = timer {
                if timer.handle.begin_fire() {
                    (timer.callback)();
                    fired += 1;
                }
            }
        }
        if fired > 0 {
            trace!("Fired {} manual timers up to {}", fired, target);
        }
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> TimestampMs {
        self.state.lock().now
    }

    fn arm(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();
        let due = state.now.saturating_add(millis(delay));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.insert(
            (due, seq),
            ManualTimer {
                handle: handle.clone(),
                callback,
            },
        );
        handle
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .finish()
    }
}

/// Delay from `now` until `deadline`, zero for deadlines already passed
pub fn delay_until(now: TimestampMs, deadline: TimestampMs) -> Duration {
    Duration::from_millis(deadline.saturating_sub(now).max(0) as u64)
}

fn millis(duration: Duration) -> TimestampMs {
    TimestampMs::try_from(duration.as_millis()).unwrap_or(TimestampMs::MAX)
}
