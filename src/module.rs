//! Module adapter interface
//!
//! A module is the probe logic for one kind of check (TCP connect, HTTP fetch,
//! pushed telemetry, ...). The engine owns scheduling, mutual exclusion and
//! timeouts; a module only turns a [`Probe`] into a result.
//!
//! ## Active vs passive
//!
//! - **Active** modules issue an outbound probe. The engine arms a timeout for
//!   every firing and races it against the module's completion.
//! - **Passive** modules receive data pushed from elsewhere. Their firings only
//!   summarize what was pushed since the last tick, so no timeout is armed and
//!   the probe is expected to complete immediately.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::Engine;
use crate::check::Check;
use crate::engine::Probe;

/// Probe category of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Active,
    Passive,
}

/// Pluggable probe implementation
#[async_trait]
pub trait CheckModule: Send + Sync + 'static {
    /// Unique registration name; checks reference the module by it
    fn name(&self) -> &str;

    fn kind(&self) -> ModuleKind {
        ModuleKind::Active
    }

    /// Validate and store module-wide options
    ///
    /// May be called repeatedly; later calls replace earlier options.
    fn configure(&self, _options: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// One-time startup, called by `Engine::start`
    async fn initialize(&self, _engine: &Engine) -> Result<()> {
        Ok(())
    }

    /// Begin one execution
    ///
    /// Must not block: anything slow is spawned and completes the probe later.
    /// Dropping the probe without completing it records the firing as
    /// abandoned.
    fn start_probe(&self, probe: Probe);

    /// Release per-check state once the check is destroyed
    fn cleanup(&self, _check: &Check) {}
}
