//! Passive telemetry ("trap") module
//!
//! Targets push JSON documents; nothing is polled. Each push is flattened
//! into metrics and written into the pending result of every `trap` check on
//! the target (or of one check, when pushed by id). The check's recurrence
//! tick then commits whatever accumulated since the previous tick.
//!
//! ## Value mapping
//!
//! - integers → `i64` (or `u64` above `i64::MAX`)
//! - other numbers → `double`
//! - strings → `text`
//! - booleans → `i32` 0/1
//! - nested objects → flattened, names joined with a backtick
//! - arrays and nulls are ignored

use anyhow::{Result, bail};
use serde_json::{Map, Value};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::Engine;
use crate::check::Check;
use crate::engine::Probe;
use crate::module::{CheckModule, ModuleKind};
use crate::stats::{Availability, MetricValue, State};

const MODULE_NAME: &str = "trap";

pub struct TrapModule;

impl TrapModule {
    /// Feed `document` to every trap check on `target`
    ///
    /// Returns the number of checks fed.
    pub fn push_for_target(engine: &Engine, target: &str, document: &Value) -> Result<usize> {
        let metrics = flatten(document)?;
        let checks: Vec<_> = engine
            .lookup_all_by_target(target)
            .into_iter()
            .filter(|check| check.module() == MODULE_NAME)
            .collect();

        for check in &checks {
            feed(check, &metrics);
        }
        debug!(
            "accepted {} metrics for {} checks on {target}",
            metrics.len(),
            checks.len()
        );
        Ok(checks.len())
    }

    /// Feed `document` to the trap check `id`
    pub fn push_for_check(engine: &Engine, id: Uuid, document: &Value) -> Result<()> {
        let Some(check) = engine.lookup(id) else {
            bail!("no check {id}");
        };
        if check.module() != MODULE_NAME {
            bail!("check {check} is not a {MODULE_NAME} check");
        }

        let metrics = flatten(document)?;
        feed(&check, &metrics);
        debug!(check = %check, "accepted {} metrics", metrics.len());
        Ok(())
    }
}

fn feed(check: &Check, metrics: &[(String, MetricValue)]) {
    for (name, value) in metrics {
        check.set_metric(name.clone(), value.clone());
    }
}

/// Turn a pushed JSON object into named metrics
pub fn flatten(document: &Value) -> Result<Vec<(String, MetricValue)>> {
    let Value::Object(object) = document else {
        bail!("telemetry must be a JSON object");
    };
    let mut metrics = Vec::new();
    flatten_into(None, object, &mut metrics);
    Ok(metrics)
}

fn flatten_into(prefix: Option<&str>, object: &Map<String, Value>, out: &mut Vec<(String, MetricValue)>) {
    for (key, value) in object {
        let name = match prefix {
            Some(prefix) => format!("{prefix}`{key}"),
            None => key.clone(),
        };

        let metric = match value {
            Value::Object(nested) => {
                flatten_into(Some(&name), nested, out);
                continue;
            }
            Value::Number(number) => {
                if let Some(v) = number.as_i64() {
                    MetricValue::I64(v)
                } else if let Some(v) = number.as_u64() {
                    MetricValue::U64(v)
                } else if let Some(v) = number.as_f64() {
                    MetricValue::Double(v)
                } else {
                    continue;
                }
            }
            Value::String(text) => MetricValue::Text(text.clone()),
            Value::Bool(flag) => MetricValue::I32(i32::from(*flag)),
            Value::Null | Value::Array(_) => {
                trace!("ignoring non-scalar metric {name}");
                continue;
            }
        };
        out.push((name, metric));
    }
}

impl CheckModule for TrapModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Passive
    }

    fn start_probe(&self, probe: Probe) {
        // Counted at commit, so a push racing the tick is reflected in the status
        probe.complete_with(|result| {
            let received = result.metrics.len();
            if received == 0 {
                result.available = Availability::Unavailable;
                result.state = State::Bad;
                result.status = Some("no data".to_string());
            } else {
                result.available = Availability::Available;
                result.state = State::Good;
                result.status = Some(format!("{received} metrics"));
            }
        });
    }
}
