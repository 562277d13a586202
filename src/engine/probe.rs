//! Starting a firing and resolving its outcome
//!
//! Every firing of an active check has two possible endings: the module
//! completes its [`Probe`], or the timeout armed next to it fires. Both may
//! happen on different threads at nearly the same moment. Each firing gets a
//! sequence number stored in the check; whoever takes it out under the check
//! mutex owns the result, the other side becomes a no-op.
//!
//! ```text
//!   dispatch ── firing = Some(seq) ──┬── probe.complete() ─┐
//!                                    │                     ├─ take firing (seq) ─ commit ─ finish
//!                                    └── timeout fires ────┘
//!                                         loser: firing is None or newer → ignored
//! ```
//!
//! A probe dropped by its module without completing resolves the firing as
//! abandoned, so the check can never stay claimed forever.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::{Counters, Engine};
use crate::check::{Check, Firing};
use crate::clock::{TimerTask, elapsed, offset};
use crate::stats::{Availability, MetricValue, State, StatsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    TimedOut,
    Abandoned,
}

impl Outcome {
    fn apply(self, snapshot: &mut StatsSnapshot) {
        let status = match self {
            Outcome::Completed => return,
            Outcome::TimedOut => "timeout",
            Outcome::Abandoned => "probe abandoned",
        };
        snapshot.available = Availability::Unavailable;
        snapshot.state = State::Bad;
        snapshot.status = Some(status.to_string());
    }
}

impl Engine {
    /// Start one execution of `check`
    ///
    /// Returns `false` when the execution guard refused it.
    #[instrument(skip_all, fields(check = %check))]
    pub(crate) fn dispatch(&self, check: &Arc<Check>, once: bool, cause: Option<Uuid>) -> bool {
        if !self.try_start(check) {
            if !check.is_killed() {
                self.note_skipped(check);
            }
            return false;
        }

        let started = self.clock().now();
        let seq = {
            let mut inner = check.inner.lock();
            inner.firing_seq += 1;
            let seq = inner.firing_seq;
            inner.firing = Some(Firing { seq, started });
            // Passive checks accumulate pushed data between ticks
            if !check.is_passive() {
                inner.pending = StatsSnapshot::default();
            }
            seq
        };

        let Some(module) = self.module(check.module()) else {
            warn!("module {} is not loaded", check.module());
            {
                let mut inner = check.inner.lock();
                inner.pending.available = Availability::Unknown;
                inner.pending.state = State::Unknown;
                inner.pending.status = Some(format!(
                    "check[{}] implementation offline",
                    check.module()
                ));
            }
            self.resolve(check, seq, Outcome::Completed);
            return true;
        };

        if !check.is_passive() {
            let deadline = offset(started, check.timeout());
            let handle = self
                .clock()
                .schedule_at(deadline, self.timeout_task(check, seq));

            let mut inner = check.inner.lock();
            if inner.firing.is_some_and(|firing| firing.seq == seq) {
                inner.timeout_timer = Some(handle);
            } else {
                // Resolved before the timer was stored
                drop(inner);
                handle.cancel();
            }
        }

        trace!(once, ?cause, seq, "starting probe");
        module.start_probe(Probe {
            engine: self.clone(),
            check: check.clone(),
            seq,
            once,
            cause,
            resolved: false,
        });
        true
    }

    fn timeout_task(&self, check: &Arc<Check>, seq: u64) -> TimerTask {
        let engine = self.downgrade();
        let check = Arc::downgrade(check);
        Box::new(move |_| {
            let (Some(engine), Some(check)) = (engine.upgrade(), check.upgrade()) else {
                return;
            };
            if engine.resolve(&check, seq, Outcome::TimedOut) {
                Counters::bump(&engine.inner.counters.timeouts);
                debug!(check = %check, "probe timed out after {:?}", check.timeout());
            }
        })
    }

    /// Settle firing `seq` of `check`; only the first caller wins
    pub(crate) fn resolve(&self, check: &Arc<Check>, seq: u64, outcome: Outcome) -> bool {
        self.resolve_with(check, seq, outcome, |_| {})
    }

    /// Like [`Engine::resolve`], running `finalize` on the result while the
    /// firing is taken
    fn resolve_with(
        &self,
        check: &Arc<Check>,
        seq: u64,
        outcome: Outcome,
        finalize: impl FnOnce(&mut StatsSnapshot),
    ) -> bool {
        let now = self.clock().now();

        let (timer, snapshot) = {
            let mut inner = check.inner.lock();
            let firing = match inner.firing {
                Some(firing) if firing.seq == seq => firing,
                _ => return false,
            };
            inner.firing = None;

            let timer = inner.timeout_timer.take();
            let mut snapshot = std::mem::take(&mut inner.pending);
            finalize(&mut snapshot);
            outcome.apply(&mut snapshot);
            snapshot.whence = Some(firing.started);
            if snapshot.duration.is_none() {
                snapshot.duration = Some(elapsed(firing.started, now));
            }
            (timer, snapshot)
        };

        if let Some(timer) = timer {
            timer.cancel();
        }

        self.install(check, snapshot);
        self.finish(check);
        true
    }

    /// Commit the pending result of `check` as its current result
    ///
    /// Meant for passive checks fed outside of a firing; during a firing the
    /// engine commits on its own.
    pub fn commit(&self, check: &Arc<Check>) {
        let snapshot = {
            let mut inner = check.inner.lock();
            let mut snapshot = std::mem::take(&mut inner.pending);
            if snapshot.whence.is_none() {
                snapshot.whence = Some(self.clock().now());
            }
            snapshot
        };
        self.install(check, snapshot);
    }

    fn install(&self, check: &Arc<Check>, snapshot: StatsSnapshot) {
        let (transition, status, dependents) = {
            let mut inner = check.inner.lock();
            let transition = inner.stats.install(snapshot);
            let status = inner.stats.current().status.clone();
            (transition, status, inner.dependents.clone())
        };

        debug!("{check} <- [{}]", status.as_deref().unwrap_or(""));
        if let Some(transition) = transition {
            info!(
                "{check} changed: {}/{} -> {}/{}",
                transition.previous.0,
                transition.previous.1,
                transition.current.0,
                transition.current.1
            );
        }
        Counters::bump(&self.inner.counters.completed);

        for id in dependents {
            let Some(dependent) = self.inner.registry.lookup(id) else {
                continue;
            };
            if dependent.is_disabled() {
                continue;
            }
            debug!("firing {dependent} in response to {check}");
            self.dispatch(&dependent, true, Some(check.id()));
        }
    }
}

/// Handle to one in-flight execution, given to a module
///
/// Setters write into the pending result only while this firing is still
/// unresolved; once the timeout has won they are ignored.
pub struct Probe {
    engine: Engine,
    check: Arc<Check>,
    seq: u64,
    once: bool,
    cause: Option<Uuid>,
    resolved: bool,
}

impl Probe {
    pub fn check(&self) -> &Arc<Check> {
        &self.check
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Fired outside the recurrence (causal trigger or `run_now`)
    pub fn once(&self) -> bool {
        self.once
    }

    /// Check whose completion triggered this firing
    pub fn cause(&self) -> Option<Uuid> {
        self.cause
    }

    /// Whether this firing has already been settled
    pub fn is_resolved(&self) -> bool {
        !self.is_current()
    }

    fn is_current(&self) -> bool {
        self.check
            .inner
            .lock()
            .firing
            .is_some_and(|firing| firing.seq == self.seq)
    }

    fn with_pending(&self, f: impl FnOnce(&mut StatsSnapshot)) -> bool {
        let mut inner = self.check.inner.lock();
        if !inner.firing.is_some_and(|firing| firing.seq == self.seq) {
            return false;
        }
        f(&mut inner.pending);
        true
    }

    pub fn set_metric(&self, name: impl Into<String>, value: impl Into<MetricValue>) -> bool {
        self.with_pending(|pending| pending.set_metric(name, value))
    }

    pub fn set_status(&self, status: impl Into<String>) -> bool {
        self.with_pending(|pending| pending.status = Some(status.into()))
    }

    pub fn set_availability(&self, available: Availability) -> bool {
        self.with_pending(|pending| pending.available = available)
    }

    pub fn set_state(&self, state: State) -> bool {
        self.with_pending(|pending| pending.state = state)
    }

    /// Override the measured duration
    pub fn set_duration(&self, duration: Duration) -> bool {
        self.with_pending(|pending| pending.duration = Some(duration))
    }

    /// Report completion; `false` when the timeout already won
    pub fn complete(mut self) -> bool {
        self.settle()
    }

    /// Report completion, letting `finalize` adjust the result as committed
    ///
    /// `finalize` sees everything written to the pending result up to the
    /// moment the firing is settled, including writes made through the
    /// [`Check`] by other threads.
    pub fn complete_with(mut self, finalize: impl FnOnce(&mut StatsSnapshot)) -> bool {
        self.resolved = true;
        let won = self
            .engine
            .resolve_with(&self.check, self.seq, Outcome::Completed, finalize);
        self.note_discarded(won)
    }

    /// Complete as unavailable/bad with `status`
    pub fn fail(mut self, status: impl Into<String>) -> bool {
        self.with_pending(|pending| {
            pending.available = Availability::Unavailable;
            pending.state = State::Bad;
            pending.status = Some(status.into());
        });
        self.settle()
    }

    fn settle(&mut self) -> bool {
        self.resolved = true;
        let won = self.engine.resolve(&self.check, self.seq, Outcome::Completed);
        self.note_discarded(won)
    }

    fn note_discarded(&self, won: bool) -> bool {
        if !won {
            Counters::bump(&self.engine.inner.counters.discarded);
            debug!(check = %self.check, "late completion ignored");
        }
        won
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        if self.engine.resolve(&self.check, self.seq, Outcome::Abandoned) {
            Counters::bump(&self.engine.inner.counters.abandoned);
            warn!(check = %self.check, "probe dropped without completing");
        }
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("check", &self.check.to_string())
            .field("seq", &self.seq)
            .field("once", &self.once)
            .field("cause", &self.cause)
            .finish()
    }
}
