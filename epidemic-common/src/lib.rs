pub mod config;
pub mod finish;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    ConfigError, EpidemicConfig, MovementConfig, OutputConfig, PopulationConfig, RunConfig,
    SimulationConfig, WorldConfig,
};
pub use finish::{FinishCondition, FinishTarget};
pub use sim_params::{SimParams, MAX_GRID_DIM};
pub use snapshot::{AgentSnapshot, EpochAssumption, HealthCategory, PopulationSnapshot};
pub use vecmath::{clamp, upper_bound_exclusive, Vec2};
