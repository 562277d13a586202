//! Check scheduling engine for a monitoring agent
//!
//! Checks are registered against pluggable modules and fired on a drift-free
//! period. The engine guarantees at most one execution per check at a time,
//! races every active probe against its timeout so exactly one outcome is
//! committed, and keeps the last two results of every check for change
//! detection.
//!
//! ```text
//! Config → Engine::schedule → Registry
//!                 │
//!        recurrence timer (Clock)
//!                 │
//!            execution guard ──→ CheckModule::start_probe(Probe)
//!                 │                              │
//!            timeout timer ─── first wins ─── probe.complete()
//!                 │
//!            Stats (previous/current) → oncheck dependents
//! ```

pub mod check;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod module;
pub mod monitors;
pub mod registry;
pub mod stats;

pub use check::{Check, CheckSpec};
pub use clock::{Clock, ManualClock, TokioClock};
pub use engine::{Engine, EngineStats, Probe};
pub use error::{EngineError, EngineResult};
pub use module::{CheckModule, ModuleKind};
pub use stats::{Availability, MetricValue, State, StatsSnapshot};
