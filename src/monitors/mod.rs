//! Built-in check modules
//!
//! - `selfcheck`: engine counters and process memory
//! - `tcp`: TCP connect time
//! - `http`: HTTP(S) request with status and body matching
//! - `trap`: passive, summarizes telemetry pushed for a target

pub mod http;
pub mod selfcheck;
pub mod tcp;
pub mod trap;

use std::sync::Arc;

use crate::Engine;
use crate::error::EngineResult;

pub use http::HttpModule;
pub use selfcheck::SelfCheckModule;
pub use tcp::TcpModule;
pub use trap::TrapModule;

/// Register every built-in module with `engine`
pub fn register_builtin(engine: &Engine) -> EngineResult<()> {
    engine.register_module(Arc::new(SelfCheckModule))?;
    engine.register_module(Arc::new(TcpModule))?;
    engine.register_module(Arc::new(HttpModule::new()))?;
    engine.register_module(Arc::new(TrapModule))?;
    Ok(())
}

/// Elapsed time in fractional milliseconds
pub(crate) fn millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
