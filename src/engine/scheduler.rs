//! Drift-free recurrence
//!
//! Each firing is anchored to the *intended* time of the previous one, not to
//! when its callback actually ran:
//!
//! ```text
//! next = last_intended + period        if that is still ahead of now
//!        now + period                  otherwise
//! ```
//!
//! Callback latency therefore does not accumulate. After a stall the overdue
//! firing that finally runs is the one catch-up; the period restarts from it
//! and the backlog of missed firings is not replayed.
//!
//! Every armed recurrence carries a generation number. A callback whose
//! generation is no longer the check's current one was superseded (the timer
//! was cancelled after it had already started firing) and does nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{instrument, trace, warn};

use super::Engine;
use crate::check::{Check, CheckInner};
use crate::clock::{TimerTask, elapsed, offset};

/// Time of the firing that follows one intended at `last_intended`
///
/// `now` is when that firing actually ran. When its grid successor is already
/// due, the late firing counts as the catch-up and the period restarts at `now`.
pub fn next_fire_time(
    last_intended: DateTime<Utc>,
    period: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let slot = offset(last_intended, period);
    if slot > now { slot } else { offset(now, period) }
}

impl Engine {
    /// Arm the first firing of a recurring check if it is idle and enabled
    pub(crate) fn kick(&self, check: &Arc<Check>) {
        if !check.is_recurring() || check.is_disabled() || check.is_killed() {
            return;
        }
        if check.inner.lock().recur_timer.is_some() {
            return;
        }
        self.arm_recurrence(check, self.clock().now());
    }

    /// Arm the recurrence timer at `at`, replacing any armed one
    pub(crate) fn arm_recurrence(&self, check: &Arc<Check>, at: DateTime<Utc>) {
        let mut inner = check.inner.lock();
        if let Some(previous) = inner.recur_timer.take() {
            previous.cancel();
        }
        self.rearm(check, &mut inner, at);
        trace!(check = %check, "next firing at {at}");
    }

    /// Arm a new recurrence generation; the caller holds the check mutex
    fn rearm(&self, check: &Arc<Check>, inner: &mut CheckInner, at: DateTime<Utc>) {
        inner.recur_gen += 1;
        let task = self.recurrence_task(check, inner.recur_gen);
        inner.last_intended = Some(at);
        inner.recur_timer = Some(self.clock().schedule_at(at, task));
    }

    fn recurrence_task(&self, check: &Arc<Check>, generation: u64) -> TimerTask {
        let engine = self.downgrade();
        let check = Arc::downgrade(check);
        Box::new(move |now| {
            let (Some(engine), Some(check)) = (engine.upgrade(), check.upgrade()) else {
                return;
            };
            engine.on_recurrence(&check, generation, now);
        })
    }

    /// Recurrence timer callback: re-arm first, then fire
    #[instrument(skip_all, fields(check = %check))]
    pub(crate) fn on_recurrence(&self, check: &Arc<Check>, generation: u64, now: DateTime<Utc>) {
        let next = {
            let mut inner = check.inner.lock();
            if inner.recur_gen != generation || inner.recur_timer.is_none() {
                trace!(generation, "superseded recurrence, ignoring");
                return;
            }
            inner.recur_timer = None;

            if check.is_disabled() || check.is_killed() {
                trace!("check disabled or killed, not firing");
                return;
            }

            if check.period().is_zero() || check.is_transient() {
                None
            } else {
                let last = inner.last_intended.unwrap_or(now);
                let next = next_fire_time(last, check.period(), now);
                self.rearm(check, &mut inner, next);
                Some(next)
            }
        };

        if let Some(next) = next
            && next > now
        {
            let lead = elapsed(now, next);
            if lead < check.timeout() {
                warn!(
                    "{check} fired late, next firing in {lead:?} may not finish within its timeout {:?}",
                    check.timeout()
                );
            }
        }

        self.dispatch(check, false, None);
    }
}
