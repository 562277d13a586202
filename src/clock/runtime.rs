//! Tokio-backed clock
//!
//! Each timer is a spawned task sleeping until its deadline. Cancellation
//! aborts the sleeping task; a timer that already woke up checks the shared
//! state before running its callback.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::trace;

use super::{Clock, TimerHandle, TimerState, TimerTask, elapsed};

/// Wall-clock timers on a Tokio runtime
#[derive(Debug, Clone)]
pub struct TokioClock {
    handle: Handle,
}

impl TokioClock {
    /// Create a clock bound to an explicit runtime
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a clock bound to the runtime of the calling context
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().context("no Tokio runtime available for timers")?;
        Ok(Self::new(handle))
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule_at(&self, when: DateTime<Utc>, task: TimerTask) -> TimerHandle {
        let state = Arc::new(TimerState::default());
        let delay = elapsed(Utc::now(), when);
        let timer_state = state.clone();

        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if timer_state.begin_fire() {
                let now = Utc::now();
                trace!("timer due at {when} fired at {now}");
                task(now);
            }
        });

        TimerHandle::new(state, Some(join.abort_handle()))
    }
}
