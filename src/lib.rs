//! Discrete-epoch, spatially aware epidemic simulation.
//!
//! [`EpidemicEngine`] owns a fixed population of agents and advances it one epoch at a
//! time. [`SimulationController`] runs an engine on a background thread and publishes a
//! population snapshot stream and an aggregate stream to subscribers.

pub mod agent;
pub mod controller;
pub mod engine;
pub mod error;
pub mod grid;
pub mod output;
pub mod streams;

pub use agent::{Agent, AgentId, HealthState};
pub use controller::{RunOutcome, SimulationController, StopHandle, StopReason};
pub use engine::EpidemicEngine;
pub use error::EngineError;
pub use grid::SpatialIndex;

pub use epidemic_common::{
    AgentSnapshot, ConfigError, EpochAssumption, FinishCondition, FinishTarget, HealthCategory,
    PopulationSnapshot, SimulationConfig,
};
