use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde_json::Value;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::Engine;
use crate::check::CheckSpec;

/// Top-level agent configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Module-wide options keyed by module name
    #[serde(default)]
    pub modules: HashMap<String, HashMap<String, Value>>,

    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CheckConfig {
    pub id: Option<Uuid>,
    pub target: String,
    pub module: String,
    pub name: Option<String>,

    /// Milliseconds between firings, 0 for one-shot
    #[serde(default = "default_period")]
    pub period: u64,

    /// Milliseconds a firing may take
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub transient: bool,

    /// Cause check, as a UUID or as `target`name`
    pub oncheck: Option<String>,

    /// Module-specific settings
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

fn default_period() -> u64 {
    60_000
}

fn default_timeout() -> u64 {
    5_000
}

/// Flatten JSON scalars to the string options modules receive
pub fn string_options(options: &HashMap<String, Value>) -> HashMap<String, String> {
    options
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect()
}

impl CheckConfig {
    /// Resolve this entry against the checks already scheduled on `engine`
    pub fn to_spec(&self, engine: &Engine) -> anyhow::Result<CheckSpec> {
        let mut spec = CheckSpec::new(&self.target, &self.module)
            .with_period(Duration::from_millis(self.period))
            .with_timeout(Duration::from_millis(self.timeout));

        spec.id = self.id;
        spec.name = self.name.clone();
        spec.disabled = self.disabled;
        spec.transient = self.transient;
        spec.config = string_options(&self.config);

        if let Some(oncheck) = &self.oncheck {
            spec.cause = Some(resolve_oncheck(engine, oncheck)?);
        }

        Ok(spec)
    }

    fn label(&self) -> String {
        format!(
            "{}`{}",
            self.target,
            self.name.as_deref().unwrap_or(&self.module)
        )
    }
}

fn resolve_oncheck(engine: &Engine, oncheck: &str) -> anyhow::Result<Uuid> {
    if let Ok(id) = oncheck.parse::<Uuid>() {
        return Ok(id);
    }

    let Some((target, name)) = oncheck.split_once('`') else {
        bail!("oncheck '{oncheck}' is neither a UUID nor target`name");
    };
    engine
        .lookup_by_target_name(target, name)
        .map(|check| check.id())
        .with_context(|| format!("oncheck '{oncheck}' names no scheduled check"))
}

impl Config {
    /// Configure modules and schedule every check on `engine`
    ///
    /// Invalid entries are logged and skipped. Checks naming an `oncheck` are
    /// retried until their cause has been scheduled. Returns the number of
    /// checks scheduled.
    pub fn apply(&self, engine: &Engine) -> usize {
        for (module, options) in &self.modules {
            if let Err(e) = engine.configure_module(module, &string_options(options)) {
                error!("{e:#}");
            }
        }

        let mut scheduled = 0;
        let mut remaining: Vec<&CheckConfig> = self.checks.iter().collect();

        loop {
            let mut deferred = Vec::new();
            let before = remaining.len();

            for entry in remaining {
                let result = entry
                    .to_spec(engine)
                    .and_then(|spec| engine.schedule(spec).map_err(anyhow::Error::from));
                match result {
                    Ok(id) => {
                        debug!("scheduled {} as {id}", entry.label());
                        scheduled += 1;
                    }
                    Err(_) if entry.oncheck.is_some() => deferred.push(entry),
                    Err(e) => error!("skipping check {}: {e:#}", entry.label()),
                }
            }

            if deferred.is_empty() {
                break;
            }
            if deferred.len() == before {
                for entry in deferred {
                    // Report the real reason once no more progress is possible
                    if let Err(e) = entry
                        .to_spec(engine)
                        .and_then(|spec| engine.schedule(spec).map_err(anyhow::Error::from))
                    {
                        error!("skipping check {}: {e:#}", entry.label());
                    } else {
                        scheduled += 1;
                    }
                }
                break;
            }
            remaining = deferred;
        }

        scheduled
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

// ============================================================================
// Tests
// ============================================================================
