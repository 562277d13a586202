//! The check engine
//!
//! [`Engine`] ties the registry, the recurrence scheduler, the execution guard
//! and the timeout/completion race together. It is a cheap, clonable handle;
//! timer callbacks only hold weak references to it and to the checks they
//! fire, so a destroyed check (or a dropped engine) turns a pending callback
//! into a no-op instead of a dangling reference.
//!
//! ## Firing flow
//!
//! ```text
//! recurrence timer → re-arm next firing → try_start ──busy──→ skipped
//!                                            │
//!                                            ▼
//!                             arm timeout, module.start_probe(probe)
//!                                            │
//!                      ┌─────────────────────┴────────────────────┐
//!                probe.complete()                           timeout fires
//!                      └──────────── first one wins ──────────────┘
//!                                            │
//!                                 commit stats → finish
//! ```
//!
//! ## Submodules
//!
//! - `scheduler`: drift-free recurrence
//! - `guard`: at-most-one execution and deferred destruction
//! - `probe`: the race resolver and the handle given to modules

mod guard;
mod probe;
mod scheduler;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::check::{Check, CheckSpec};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::module::{CheckModule, ModuleKind};
use crate::registry::Registry;

pub use probe::Probe;
pub use scheduler::next_fire_time;

/// Handle to a running engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine handle for callbacks
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

struct EngineInner {
    clock: Arc<dyn Clock>,
    registry: Registry,
    modules: parking_lot::RwLock<HashMap<String, Arc<ModuleEntry>>>,
    counters: Counters,
    started: AtomicBool,
}

struct ModuleEntry {
    module: Arc<dyn CheckModule>,
    initialized: AtomicBool,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    timeouts: AtomicU64,
    skipped: AtomicU64,
    discarded: AtomicU64,
    abandoned: AtomicU64,
    guard_leaks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Engine-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Checks currently in the registry
    pub checks: usize,

    /// Checks ever scheduled
    pub scheduled: u64,

    /// Results committed
    pub completed: u64,

    /// Firings resolved by their timeout
    pub timeouts: u64,

    /// Firings dropped because the previous one was still running
    pub skipped: u64,

    /// Late or duplicate completions that were ignored
    pub discarded: u64,

    /// Probes dropped by their module without completing
    pub abandoned: u64,

    /// Skipped firings whose in-flight run had lasted over two periods
    pub guard_leaks: u64,
}

impl Engine {
    /// Create an engine scheduling against `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                clock,
                registry: Registry::new(),
                modules: parking_lot::RwLock::new(HashMap::new()),
                counters: Counters::default(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// Attach a module under its unique name
    pub fn register_module(&self, module: Arc<dyn CheckModule>) -> EngineResult<()> {
        let name = module.name().to_string();
        let mut modules = self.inner.modules.write();
        if modules.contains_key(&name) {
            return Err(EngineError::DuplicateModule(name));
        }

        debug!(module = %name, "registered module");
        modules.insert(
            name,
            Arc::new(ModuleEntry {
                module,
                initialized: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    /// Pass module-wide options to a registered module
    pub fn configure_module(
        &self,
        name: &str,
        options: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let module = self
            .module(name)
            .ok_or_else(|| EngineError::UnknownModule(name.to_string()))?;
        module
            .configure(options)
            .with_context(|| format!("invalid options for module '{name}'"))
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn CheckModule>> {
        self.inner
            .modules
            .read()
            .get(name)
            .map(|entry| entry.module.clone())
    }

    /// Initialize modules and arm every recurring check
    ///
    /// Modules are initialized once each; calling `start` again only
    /// initializes modules registered since.
    pub async fn start(&self) -> anyhow::Result<()> {
        let entries: Vec<Arc<ModuleEntry>> =
            self.inner.modules.read().values().cloned().collect();

        for entry in entries {
            if entry.initialized.load(Ordering::SeqCst) {
                continue;
            }
            entry
                .module
                .initialize(self)
                .await
                .with_context(|| format!("failed to initialize module '{}'", entry.module.name()))?;
            entry.initialized.store(true, Ordering::SeqCst);
        }

        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.registry.for_each(|check| self.kick(check));

        info!(checks = self.inner.registry.len(), "engine started");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registry surface
    // ------------------------------------------------------------------

    /// Create a check and, once the engine is started, arm its first firing
    #[instrument(skip_all, fields(target = %spec.target, module = %spec.module))]
    pub fn schedule(&self, spec: CheckSpec) -> EngineResult<Uuid> {
        let module = self
            .module(&spec.module)
            .ok_or_else(|| EngineError::UnknownModule(spec.module.clone()))?;

        let address: IpAddr = spec
            .target
            .parse()
            .map_err(|_| EngineError::InvalidTarget(spec.target.clone()))?;

        let id = spec.id.unwrap_or_else(Uuid::new_v4);
        if self.inner.registry.lookup(id).is_some() {
            return Err(EngineError::DuplicateId(id));
        }

        let cause = match spec.cause {
            Some(cause) => Some(self.resolve_cause(id, cause)?),
            None => None,
        };

        if !spec.period.is_zero() && spec.timeout >= spec.period {
            warn!(
                "timeout {:?} is not below period {:?}, clamping",
                spec.timeout, spec.period
            );
        }

        let passive = module.kind() == ModuleKind::Passive;
        let check = Arc::new(Check::new(id, address, spec, passive));
        self.inner.registry.insert(check.clone())?;

        if let Some(cause) = cause {
            cause.inner.lock().dependents.push(id);
        }
        // Dependents scheduled before this check (same id re-added)
        let orphans = self.inner.registry.caused_by(id);
        if !orphans.is_empty() {
            check.inner.lock().dependents.extend(orphans);
        }

        Counters::bump(&self.inner.counters.scheduled);
        debug!(check = %check, %id, "scheduled check");

        if self.is_started() {
            self.kick(&check);
        }
        Ok(id)
    }

    /// Remove a check; deferred until its in-flight firing finishes
    #[instrument(skip(self))]
    pub fn deschedule(&self, id: Uuid) -> EngineResult<()> {
        let check = self.lookup(id).ok_or(EngineError::NotFound(id))?;

        check.mark_killed();
        let recur = check.inner.lock().recur_timer.take();
        if let Some(timer) = recur {
            timer.cancel();
        }

        if check.is_running() {
            debug!(check = %check, "check is running, destruction deferred");
            return Ok(());
        }

        self.destroy(&check);
        Ok(())
    }

    /// Deschedule every check
    pub fn deschedule_all(&self) {
        self.inner.registry.for_each(|check| {
            let _ = self.deschedule(check.id());
        });
    }

    pub fn lookup(&self, id: Uuid) -> Option<Arc<Check>> {
        self.inner.registry.lookup(id)
    }

    pub fn lookup_by_target_name(&self, target: &str, name: &str) -> Option<Arc<Check>> {
        self.inner.registry.lookup_by_target_name(target, name)
    }

    pub fn lookup_all_by_target(&self, target: &str) -> Vec<Arc<Check>> {
        self.inner.registry.lookup_all_by_target(target)
    }

    pub fn for_each(&self, f: impl FnMut(&Arc<Check>)) {
        self.inner.registry.for_each(f);
    }

    /// Fire a check immediately, outside its recurrence
    ///
    /// Returns `false` when the check was busy and the firing was skipped.
    pub fn run_now(&self, id: Uuid) -> EngineResult<bool> {
        let check = self.lookup(id).ok_or(EngineError::NotFound(id))?;
        Ok(self.dispatch(&check, true, None))
    }

    /// Pause or resume a check's recurrence
    pub fn set_disabled(&self, id: Uuid, disabled: bool) -> EngineResult<()> {
        let check = self.lookup(id).ok_or(EngineError::NotFound(id))?;
        check.set_disabled(disabled);

        if disabled {
            let recur = check.inner.lock().recur_timer.take();
            if let Some(timer) = recur {
                timer.cancel();
            }
            debug!(check = %check, "check disabled");
        } else if self.is_started() {
            self.kick(&check);
            debug!(check = %check, "check enabled");
        }
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let counters = &self.inner.counters;
        EngineStats {
            checks: self.inner.registry.len(),
            scheduled: counters.scheduled.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            abandoned: counters.abandoned.load(Ordering::Relaxed),
            guard_leaks: counters.guard_leaks.load(Ordering::Relaxed),
        }
    }

    /// Find the cause check and make sure linking to it closes no loop
    fn resolve_cause(&self, id: Uuid, cause: Uuid) -> EngineResult<Arc<Check>> {
        let parent = self
            .inner
            .registry
            .lookup(cause)
            .ok_or(EngineError::CauseNotFound(cause))?;

        let mut seen = HashSet::new();
        let mut cursor = Some(cause);
        while let Some(current) = cursor {
            if current == id {
                return Err(EngineError::CausalCycle { check: id, cause });
            }
            if !seen.insert(current) {
                break;
            }
            cursor = self
                .inner
                .registry
                .lookup(current)
                .and_then(|check| check.cause());
        }

        Ok(parent)
    }
}
