use epidemic_common::ConfigError;
use thiserror::Error;

/// Errors returned by the engine and the controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A configuration parameter violates its constraint; no engine state was created.
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// `start` was called while a run is active; the active run is untouched.
    #[error("a simulation is already running")]
    AlreadyRunning,
    #[error("failed to spawn the epoch loop thread: {0}")]
    Spawn(String),
}
