//! Self-monitoring: reports the engine's own counters and the memory the
//! process uses.

use sysinfo::{ProcessesToUpdate, System};
use tracing::trace;

use crate::engine::{EngineStats, Probe};
use crate::module::CheckModule;
use crate::stats::{Availability, State};

pub struct SelfCheckModule;

fn record_counters(probe: &Probe, stats: &EngineStats) {
    probe.set_metric("checks", stats.checks as u64);
    probe.set_metric("scheduled", stats.scheduled);
    probe.set_metric("completed", stats.completed);
    probe.set_metric("timeouts", stats.timeouts);
    probe.set_metric("skipped", stats.skipped);
    probe.set_metric("discarded", stats.discarded);
    probe.set_metric("abandoned", stats.abandoned);
    probe.set_metric("guard_leaks", stats.guard_leaks);
}

/// Resident and virtual memory of this process in bytes
fn process_memory() -> Option<(u64, u64)> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|process| (process.memory(), process.virtual_memory()))
}

fn finish(probe: Probe, memory: Option<(u64, u64)>) {
    if let Some((resident, virtual_memory)) = memory {
        probe.set_metric("memory_resident", resident);
        probe.set_metric("memory_virtual", virtual_memory);
    }
    probe.set_availability(Availability::Available);
    probe.set_state(State::Good);
    probe.set_status("ok");
    probe.complete();
}

impl CheckModule for SelfCheckModule {
    fn name(&self) -> &str {
        "selfcheck"
    }

    fn start_probe(&self, probe: Probe) {
        let stats = probe.engine().stats();
        record_counters(&probe, &stats);

        // Process table reads block; keep them off the timer thread
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || finish(probe, process_memory()));
            }
            Err(_) => {
                trace!("no async runtime, skipping memory metrics");
                finish(probe, None);
            }
        }
    }
}
