//! Error types for scheduling operations
//!
//! Only the registry and scheduling surface return these. Probe failures never
//! become errors; they are recorded in the check's stats instead.

use uuid::Uuid;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned synchronously by `schedule`, `deschedule` and friends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Target is neither an IPv4 nor an IPv6 address
    #[error("invalid target '{0}': expected an IPv4 or IPv6 address")]
    InvalidTarget(String),

    /// A check with this id is already registered
    #[error("check {0} is already scheduled")]
    DuplicateId(Uuid),

    /// Another check already uses this target`name pair
    #[error("check {target}`{name} is already scheduled")]
    DuplicateName { target: String, name: String },

    /// No module is registered under this name
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    /// A module with this name is already registered
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    /// No check is registered under this id
    #[error("check {0} not found")]
    NotFound(Uuid),

    /// The check named as cause does not exist
    #[error("cause check {0} not found")]
    CauseNotFound(Uuid),

    /// Linking the check to its cause would close a loop
    #[error("check {check} cannot be caused by {cause}: dependency cycle")]
    CausalCycle { check: Uuid, cause: Uuid },
}
