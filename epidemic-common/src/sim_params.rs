use serde::{Deserialize, Serialize};

/// Upper bound on spatial grid cells along either axis.
pub const MAX_GRID_DIM: u32 = 512;

/// Simulation parameters derived from the configuration, used frequently during epoch advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // World & Grid
    pub world_width: f32,
    pub world_height: f32,
    pub unit_size: f32,
    pub grid_cell_size: f32,
    pub inv_grid_cell_size: f32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,

    // Initial placement bins (unit_size squares)
    pub placement_cols: u32,
    pub placement_rows: u32,

    // Population
    pub total_population: u32,
    pub infected_at_start: u32,

    // Disease, probabilities as fractions in [0, 1]
    pub infection_radius: f32,
    pub infection_chance: f64,
    pub death_chance: f64,
    pub infection_interval: u64, // Epochs a Sick agent stays contagious

    // Movement
    pub speed: f32, // World units per epoch
    pub turn_probability: f64,

    pub seed: u64,
}
