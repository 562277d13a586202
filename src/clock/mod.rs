//! Timer facility the engine schedules against
//!
//! The engine never sleeps or spawns on its own. Every recurrence and timeout
//! is a callback registered with a [`Clock`] at an absolute time, which keeps
//! the scheduling logic independent of the runtime driving it.
//!
//! ## Implementations
//!
//! - **TokioClock** (default): wall-clock time, callbacks run on Tokio worker threads
//! - **ManualClock**: simulated time advanced explicitly, for deterministic tests
//!
//! ## Cancellation
//!
//! Cancelling a timer is best-effort. A timer that has already started firing
//! cannot be recalled; callers that race a timer against another event must
//! arbitrate the outcome themselves (see `engine::probe`).

pub mod manual;
pub mod runtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub use manual::ManualClock;
pub use runtime::TokioClock;

/// Callback run when a timer fires; receives the observed firing time
pub type TimerTask = Box<dyn FnOnce(DateTime<Utc>) + Send + 'static>;

/// Source of time and timers for the engine
///
/// Implementations must be `Send + Sync`: callbacks may be registered and may
/// run on any thread.
pub trait Clock: Send + Sync + 'static {
    /// Current time as seen by this clock
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once `when` has been reached
    ///
    /// A `when` in the past fires as soon as possible. The returned handle
    /// cancels the timer if it has not fired yet.
    fn schedule_at(&self, when: DateTime<Utc>, task: TimerTask) -> TimerHandle;
}

/// Handle to an armed timer
///
/// Dropping the handle does not cancel the timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<TimerState>,
    abort: Option<tokio::task::AbortHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct TimerState {
    cancelled: AtomicBool,
    fired: AtomicBool,
}

impl TimerState {
    /// Claim the right to run the callback; false once cancelled or fired
    pub(crate) fn begin_fire(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        !self.fired.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl TimerHandle {
    pub(crate) fn new(state: Arc<TimerState>, abort: Option<tokio::task::AbortHandle>) -> Self {
        Self { state, abort }
    }

    /// Cancel the timer
    ///
    /// Returns `true` if the callback is guaranteed not to run, `false` if it
    /// has already started (or finished) firing.
    pub fn cancel(&self) -> bool {
        self.state.cancelled.store(true, Ordering::SeqCst);
        let prevented = !self.state.fired.load(Ordering::SeqCst);
        if prevented && let Some(abort) = &self.abort {
            abort.abort();
        }
        prevented
    }

    /// Whether the callback has started running
    pub fn has_fired(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }
}

/// Convert a std duration to a chrono delta, saturating on overflow
pub fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at + duration`, saturating at the maximum representable time
pub fn offset(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Elapsed time from `from` to `to`, zero when `to` is earlier
pub fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
