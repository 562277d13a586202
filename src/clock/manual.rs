//! Simulated clock (no wall time)
//!
//! Time only moves when the owner calls [`ManualClock::advance`] or
//! [`ManualClock::stall`]. Due timers run on the calling thread, in
//! deadline order, which makes scheduling behaviour fully deterministic.
//!
//! ## Stalls
//!
//! `stall` moves time forward *without* running timers, emulating a process
//! that could not run for a while. The next `advance` then fires the overdue
//! timers late, with the stalled time as their observed firing time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::{Clock, TimerHandle, TimerState, TimerTask, offset};

/// Clock whose time is advanced by hand
pub struct ManualClock {
    inner: Mutex<Inner>,
}

struct Inner {
    now: DateTime<Utc>,
    seq: u64,
    queue: BinaryHeap<Entry>,
}

struct Entry {
    when: DateTime<Utc>,
    seq: u64,
    state: Arc<TimerState>,
    task: TimerTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; earliest deadline (then earliest insertion) first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl ManualClock {
    /// Create a clock starting at the Unix epoch
    pub fn new() -> Self {
        Self::starting_at(DateTime::<Utc>::default())
    }

    /// Create a clock starting at `now`
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                now,
                seq: 0,
                queue: BinaryHeap::new(),
            }),
        }
    }

    /// Move time forward by `by`, running every timer that becomes due
    pub fn advance(&self, by: Duration) {
        let target = offset(self.now(), by);
        self.advance_to(target);
    }

    /// Move time forward to `target`, running every timer that becomes due
    ///
    /// Timers armed by callbacks are honoured in the same pass when they fall
    /// at or before `target`.
    pub fn advance_to(&self, target: DateTime<Utc>) {
        loop {
            let due = {
                let mut inner = self.inner.lock();
                let is_due = inner.queue.peek().is_some_and(|entry| entry.when <= target);
                if is_due {
                    let entry = inner.queue.pop();
                    if let Some(entry) = &entry
                        && entry.when > inner.now
                    {
                        inner.now = entry.when;
                    }
                    entry.map(|entry| (entry, inner.now))
                } else {
                    if target > inner.now {
                        inner.now = target;
                    }
                    None
                }
            };

            let Some((entry, observed)) = due else {
                break;
            };

            if entry.state.begin_fire() {
                trace!("manual clock firing timer #{} at {observed}", entry.seq);
                (entry.task)(observed);
            }
        }
    }

    /// Move time forward without running any timer
    pub fn stall(&self, by: Duration) {
        let mut inner = self.inner.lock();
        inner.now = offset(inner.now, by);
    }

    /// Run timers that are already due at the current time
    pub fn run_due(&self) {
        self.advance(Duration::ZERO);
    }

    /// Number of armed timers that have not fired or been cancelled
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .queue
            .iter()
            .filter(|entry| !entry.state.is_cancelled())
            .count()
    }

    /// Deadline of the earliest live timer
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .queue
            .iter()
            .filter(|entry| !entry.state.is_cancelled())
            .map(|entry| entry.when)
            .min()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().now
    }

    fn schedule_at(&self, when: DateTime<Utc>, task: TimerTask) -> TimerHandle {
        let state = Arc::new(TimerState::default());
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner.queue.push(Entry {
            when,
            seq,
            state: state.clone(),
            task,
        });
        TimerHandle::new(state, None)
    }
}
