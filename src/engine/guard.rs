//! Execution guard
//!
//! A check runs at most once at a time. `try_start` claims the `running` flag
//! with a compare-and-swap; a firing that loses is skipped, not queued.
//! `finish` releases the flag and performs any destruction that was deferred
//! while the check was running.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{Counters, Engine};
use crate::check::Check;
use crate::clock::elapsed;

impl Engine {
    /// Claim a check for one execution
    ///
    /// Fails when the check is killed or another execution holds the guard.
    pub fn try_start(&self, check: &Arc<Check>) -> bool {
        if check.is_killed() {
            return false;
        }
        if !check.acquire() {
            return false;
        }
        // Killed between the first test and the swap: hand the guard back
        if check.is_killed() {
            self.finish(check);
            return false;
        }
        true
    }

    /// Release a check after its execution
    ///
    /// Destroys the check when it was killed meanwhile, or when it is
    /// transient and this call actually ended a run.
    pub fn finish(&self, check: &Arc<Check>) {
        let was_running = check.release();
        if check.is_killed() || (was_running && check.is_transient()) {
            self.destroy(check);
        }
    }

    /// Unregister a check and drop its timers
    ///
    /// Idempotent: only the caller that removes the check from the registry
    /// does the teardown.
    pub(crate) fn destroy(&self, check: &Arc<Check>) {
        if self.inner.registry.remove(check.id()).is_none() {
            return;
        }
        check.mark_killed();

        let (recur, timeout) = {
            let mut inner = check.inner.lock();
            (inner.recur_timer.take(), inner.timeout_timer.take())
        };
        for timer in [recur, timeout].into_iter().flatten() {
            timer.cancel();
        }

        if let Some(cause) = check.cause().and_then(|id| self.inner.registry.lookup(id)) {
            cause.inner.lock().dependents.retain(|id| *id != check.id());
        }

        if let Some(module) = self.module(check.module()) {
            module.cleanup(check);
        }

        debug!(check = %check, id = %check.id(), "check destroyed");
    }

    /// Account for a firing dropped by the guard
    pub(crate) fn note_skipped(&self, check: &Arc<Check>) {
        Counters::bump(&self.inner.counters.skipped);

        let started = check.inner.lock().firing.map(|firing| firing.started);
        let period = check.period();
        let now = self.clock().now();

        let leaked = |started: DateTime<Utc>| {
            !period.is_zero()
                && period
                    .checked_mul(2)
                    .is_some_and(|limit| elapsed(started, now) > limit)
        };

        match started {
            Some(started) if leaked(started) => {
                Counters::bump(&self.inner.counters.guard_leaks);
                warn!(
                    check = %check,
                    "execution started at {started} still holds the guard, skipping"
                );
            }
            _ => debug!(check = %check, "previous execution still running, skipping"),
        }
    }
}
