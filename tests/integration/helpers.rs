//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use checkd::clock::{Clock, offset};
use checkd::{Availability, CheckModule, Engine, ManualClock, ModuleKind, Probe, State};
use parking_lot::Mutex;
use uuid::Uuid;

/// How a [`ScriptedModule`] answers a probe
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Complete available/good inside `start_probe`
    CompleteNow,

    /// Complete available/good after the given simulated delay
    CompleteAfter(Duration),

    /// Keep the probe without completing it
    Hold,

    /// Complete unavailable/bad right away
    Fail(&'static str),
}

/// One `start_probe` call as seen by the module
#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    pub check: Uuid,
    pub at: DateTime<Utc>,
    pub once: bool,
    pub cause: Option<Uuid>,
}

/// Test module driven by the manual clock
pub struct ScriptedModule {
    name: String,
    kind: ModuleKind,
    clock: Arc<ManualClock>,
    behaviour: Mutex<Behaviour>,
    pub held: Mutex<Vec<Probe>>,
    pub starts: Mutex<Vec<Start>>,
    /// Results returned by `Probe::complete`
    pub completions: Arc<Mutex<Vec<bool>>>,
    pub cleaned: Mutex<Vec<Uuid>>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedModule {
    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock() = behaviour;
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().len()
    }

    pub fn start_times(&self) -> Vec<DateTime<Utc>> {
        self.starts.lock().iter().map(|start| start.at).collect()
    }

    /// Drop every held probe without completing it
    ///
    /// The probes are dropped outside the `held` lock: abandoning one may
    /// fire dependents that land back in this module.
    pub fn drop_held(&self) -> usize {
        let probes: Vec<Probe> = self.held.lock().drain(..).collect();
        self.in_flight.fetch_sub(probes.len(), Ordering::SeqCst);
        probes.len()
    }

    /// Complete every held probe as available/good
    pub fn release_held(&self) -> Vec<bool> {
        let probes: Vec<Probe> = self.held.lock().drain(..).collect();
        probes
            .into_iter()
            .map(|probe| {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                probe.set_availability(Availability::Available);
                probe.set_state(State::Good);
                probe.complete()
            })
            .collect()
    }
}

impl CheckModule for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn start_probe(&self, probe: Probe) {
        let now = self.clock.now();
        self.starts.lock().push(Start {
            check: probe.check().id(),
            at: now,
            once: probe.once(),
            cause: probe.cause(),
        });

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let behaviour = self.behaviour.lock().clone();
        match behaviour {
            Behaviour::CompleteNow => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                probe.set_availability(Availability::Available);
                probe.set_state(State::Good);
                let won = probe.complete();
                self.completions.lock().push(won);
            }
            Behaviour::CompleteAfter(delay) => {
                let completions = self.completions.clone();
                let in_flight = self.in_flight.clone();
                self.clock.schedule_at(
                    offset(now, delay),
                    Box::new(move |_| {
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        probe.set_availability(Availability::Available);
                        probe.set_state(State::Good);
                        probe.set_status("ok");
                        let won = probe.complete();
                        completions.lock().push(won);
                    }),
                );
            }
            Behaviour::Hold => self.held.lock().push(probe),
            Behaviour::Fail(status) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                let won = probe.fail(status);
                self.completions.lock().push(won);
            }
        }
    }

    fn cleanup(&self, check: &checkd::Check) {
        self.cleaned.lock().push(check.id());
    }
}

pub fn setup() -> (Arc<ManualClock>, Engine) {
    let clock = Arc::new(ManualClock::new());
    let engine = Engine::new(clock.clone());
    (clock, engine)
}

pub fn scripted(
    engine: &Engine,
    clock: &Arc<ManualClock>,
    name: &str,
    behaviour: Behaviour,
) -> Arc<ScriptedModule> {
    scripted_with_kind(engine, clock, name, ModuleKind::Active, behaviour)
}

pub fn scripted_with_kind(
    engine: &Engine,
    clock: &Arc<ManualClock>,
    name: &str,
    kind: ModuleKind,
    behaviour: Behaviour,
) -> Arc<ScriptedModule> {
    let module = Arc::new(ScriptedModule {
        name: name.to_string(),
        kind,
        clock: clock.clone(),
        behaviour: Mutex::new(behaviour),
        held: Mutex::new(Vec::new()),
        starts: Mutex::new(Vec::new()),
        completions: Arc::new(Mutex::new(Vec::new())),
        cleaned: Mutex::new(Vec::new()),
        in_flight: Arc::new(AtomicUsize::new(0)),
        max_in_flight: Arc::new(AtomicUsize::new(0)),
    });
    engine.register_module(module.clone()).unwrap();
    module
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// `t0 + millis`
pub fn at(t0: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
    offset(t0, ms(millis))
}
