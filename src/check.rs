//! The unit of monitoring work
//!
//! A [`Check`] carries its immutable identity (id, target, module, config,
//! period, timeout) next to the mutable execution state the engine needs:
//! lifecycle flags, the last intended fire time, armed timers, the active
//! firing and the result pair.
//!
//! ## Concurrency
//!
//! `running`, `killed` and `disabled` are atomics: `killed` in particular may
//! be set by `deschedule` from any thread. Everything else sits behind one
//! per-check mutex that is never held while calling into a module.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::clock::TimerHandle;
use crate::stats::{Availability, MetricValue, State, Stats, StatsSnapshot};

const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to create a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    /// Explicit id; generated when absent
    pub id: Option<Uuid>,
    pub target: String,
    pub module: String,
    /// Defaults to the module name
    pub name: Option<String>,
    /// Zero means one-shot
    pub period: Duration,
    pub timeout: Duration,
    pub config: HashMap<String, String>,
    pub disabled: bool,
    pub transient: bool,
    /// Check whose completion triggers this one
    pub cause: Option<Uuid>,
}

impl CheckSpec {
    pub fn new(target: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            id: None,
            target: target.into(),
            module: module.into(),
            name: None,
            period: DEFAULT_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            config: HashMap::new(),
            disabled: false,
            transient: false,
            cause: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn caused_by(mut self, cause: Uuid) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Clamp `timeout` below `period`: a timeout that is not shorter than a
/// non-zero period becomes half the period.
pub fn clamp_timeout(period: Duration, timeout: Duration) -> Duration {
    if !period.is_zero() && timeout >= period {
        period / 2
    } else {
        timeout
    }
}

/// One in-flight execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Firing {
    pub(crate) seq: u64,
    pub(crate) started: DateTime<Utc>,
}

/// Mutable state guarded by the per-check mutex
#[derive(Debug, Default)]
pub(crate) struct CheckInner {
    pub(crate) last_intended: Option<DateTime<Utc>>,
    pub(crate) recur_timer: Option<TimerHandle>,
    /// Generation of the armed recurrence; stale callbacks compare unequal
    pub(crate) recur_gen: u64,
    pub(crate) timeout_timer: Option<TimerHandle>,
    /// Set while a firing is unresolved; taking it is the "already completed" flag
    pub(crate) firing: Option<Firing>,
    pub(crate) firing_seq: u64,
    /// Result being assembled for the next commit
    pub(crate) pending: StatsSnapshot,
    pub(crate) stats: Stats,
    pub(crate) dependents: Vec<Uuid>,
}

/// A scheduled check
pub struct Check {
    id: Uuid,
    target: String,
    address: IpAddr,
    name: String,
    module: String,
    config: HashMap<String, String>,
    period: Duration,
    timeout: Duration,
    cause: Option<Uuid>,
    transient: bool,
    passive: bool,
    running: AtomicBool,
    killed: AtomicBool,
    disabled: AtomicBool,
    pub(crate) inner: Mutex<CheckInner>,
}

impl Check {
    /// Build a check from an already validated spec
    pub(crate) fn new(id: Uuid, address: IpAddr, spec: CheckSpec, passive: bool) -> Self {
        let name = spec.name.unwrap_or_else(|| spec.module.clone());
        Self {
            id,
            target: spec.target,
            address,
            name,
            module: spec.module,
            config: spec.config,
            period: spec.period,
            timeout: clamp_timeout(spec.period, spec.timeout),
            cause: spec.cause,
            transient: spec.transient,
            passive,
            running: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            disabled: AtomicBool::new(spec.disabled),
            inner: Mutex::new(CheckInner::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Parsed form of `target`
    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cause(&self) -> Option<Uuid> {
        self.cause
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_passive(&self) -> bool {
        self.passive
    }

    /// Whether the recurrence scheduler drives this check
    ///
    /// Checks triggered by a cause only run when their cause completes.
    pub fn is_recurring(&self) -> bool {
        self.cause.is_none()
    }

    /// Scheduled time of the latest firing
    pub fn last_intended_fire_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_intended
    }

    /// Deadline of the armed recurrence timer, if any
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock();
        inner.recur_timer.as_ref().and(inner.last_intended)
    }

    pub fn current_stats(&self) -> StatsSnapshot {
        self.inner.lock().stats.current().clone()
    }

    pub fn previous_stats(&self) -> StatsSnapshot {
        self.inner.lock().stats.previous().clone()
    }

    /// Copy of the result being assembled
    pub fn pending_stats(&self) -> StatsSnapshot {
        self.inner.lock().pending.clone()
    }

    pub fn dependents(&self) -> Vec<Uuid> {
        self.inner.lock().dependents.clone()
    }

    /// Record a metric into the pending result
    pub fn set_metric(&self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.inner.lock().pending.set_metric(name, value);
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.inner.lock().pending.status = Some(status.into());
    }

    pub fn set_availability(&self, available: Availability) {
        self.inner.lock().pending.available = available;
    }

    pub fn set_state(&self, state: State) {
        self.inner.lock().pending.state = state;
    }

    /// Test-and-set `running`; true when this caller now owns the guard
    pub(crate) fn acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clear `running`; returns whether it was set
    pub(crate) fn release(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn mark_killed(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}`{}", self.target, self.name)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("name", &self.name)
            .field("module", &self.module)
            .field("period", &self.period)
            .field("timeout", &self.timeout)
            .field("running", &self.is_running())
            .field("killed", &self.is_killed())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
