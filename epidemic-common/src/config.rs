use crate::finish::FinishCondition;
use crate::sim_params::{SimParams, MAX_GRID_DIM};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// A configuration value that cannot start a simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("total_population must be greater than 0")]
    EmptyPopulation,
    #[error("infected_at_start ({infected}) exceeds total_population ({total})")]
    TooManyInfected { infected: u32, total: u32 },
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{field} must be positive and finite, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("infection_interval must be at least 1 epoch")]
    ZeroInfectionInterval,
}

// Population size and the initially infected share.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PopulationConfig {
    pub total_population: u32,
    /// Number of agents that start Sick. Takes precedence over the percentage.
    #[serde(default)]
    pub infected_at_start: Option<u32>,
    /// Share of the population (0-100) that starts Sick, floored to a whole agent count.
    #[serde(default)]
    pub infected_at_start_percent: Option<f32>,
}

// Disease parameters. Probabilities and rates are percentages.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EpidemicConfig {
    pub infection_probability: f32,
    pub infection_radius: f32,
    pub death_rate: f32,
    pub infection_interval: u32,
}

// Bounded world rectangle and the per-agent footprint.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorldConfig {
    #[serde(default = "default_world_extent")]
    pub width: f32,
    #[serde(default = "default_world_extent")]
    pub height: f32,
    #[serde(default = "default_unit_size")]
    pub unit_size: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct MovementConfig {
    /// Distance travelled per epoch. Defaults to a tenth of the unit size.
    #[serde(default)]
    pub speed: Option<f32>,
    /// Chance (0-1) that an agent picks a new heading in a given epoch.
    #[serde(default)]
    pub turn_probability: Option<f32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Wall-clock pause between epochs. 0 runs epochs back to back.
    #[serde(default = "default_epoch_interval_ms")]
    pub epoch_interval_ms: u64,
    #[serde(default)]
    pub max_epochs: Option<u64>,
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_assumptions: bool,
    #[serde(default)]
    pub save_snapshots: bool,
    #[serde(default)]
    pub save_final_population: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

/// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub population: PopulationConfig,
    pub epidemic: EpidemicConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub finish: Option<FinishCondition>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            width: default_world_extent(),
            height: default_world_extent(),
            unit_size: default_unit_size(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            seed: default_seed(),
            epoch_interval_ms: default_epoch_interval_ms(),
            max_epochs: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: default_base_filename(),
            save_assumptions: true,
            save_snapshots: false,
            save_final_population: false,
            format: None,
        }
    }
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    /// Only syntax is checked here; `validate` runs when an engine is initialized.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: SimulationConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;

        Ok(config)
    }

    /// Builds a configuration from the core epidemic parameters, every other section defaulted.
    pub fn new(
        total_population: u32,
        infected_at_start: u32,
        infection_probability: f32,
        infection_radius: f32,
        death_rate: f32,
        infection_interval: u32,
    ) -> Self {
        SimulationConfig {
            population: PopulationConfig {
                total_population,
                infected_at_start: Some(infected_at_start),
                infected_at_start_percent: None,
            },
            epidemic: EpidemicConfig {
                infection_probability,
                infection_radius,
                death_rate,
                infection_interval,
            },
            world: WorldConfig::default(),
            movement: MovementConfig::default(),
            run: RunConfig::default(),
            finish: None,
            output: OutputConfig::default(),
        }
    }

    /// Number of agents initialized as Sick.
    pub fn infected_at_start(&self) -> u32 {
        let total = self.population.total_population;
        match (
            self.population.infected_at_start,
            self.population.infected_at_start_percent,
        ) {
            (Some(count), _) => count,
            (None, Some(percent)) => (percent as f64 / 100.0 * total as f64).floor() as u32,
            (None, None) => 0,
        }
    }

    pub fn speed(&self) -> f32 {
        self.movement.speed.unwrap_or(self.world.unit_size / 10.0)
    }

    pub fn turn_probability(&self) -> f32 {
        self.movement.turn_probability.unwrap_or(0.05)
    }

    /// Checks every parameter constraint. The first violation found is returned.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let total = self.population.total_population;
        if total == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        if let Some(percent) = self.population.infected_at_start_percent {
            check_range("infected_at_start_percent", percent, 0.0, 100.0)?;
        }
        let infected = self.infected_at_start();
        if infected > total {
            return Err(ConfigError::TooManyInfected { infected, total });
        }

        let epidemic = &self.epidemic;
        check_range("infection_probability", epidemic.infection_probability, 0.0, 100.0)?;
        check_range("death_rate", epidemic.death_rate, 0.0, 100.0)?;
        check_positive("infection_radius", epidemic.infection_radius)?;
        if epidemic.infection_interval == 0 {
            return Err(ConfigError::ZeroInfectionInterval);
        }

        check_positive("world.width", self.world.width)?;
        check_positive("world.height", self.world.height)?;
        check_positive("world.unit_size", self.world.unit_size)?;

        let speed = self.speed();
        if !(speed >= 0.0 && speed.is_finite()) {
            return Err(ConfigError::OutOfRange {
                field: "movement.speed",
                value: speed as f64,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        check_range("movement.turn_probability", self.turn_probability(), 0.0, 1.0)?;

        if let Some(finish) = &self.finish {
            check_range("finish.percent", finish.percent, 0.0, 100.0)?;
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let world_width = self.world.width;
        let world_height = self.world.height;
        let unit_size = self.world.unit_size;
        let infection_radius = self.epidemic.infection_radius;

        // Grid cells are one infection radius wide, widened so neither axis exceeds MAX_GRID_DIM.
        let grid_cell_size = infection_radius
            .max(world_width / MAX_GRID_DIM as f32)
            .max(world_height / MAX_GRID_DIM as f32);
        let inv_grid_cell_size = if grid_cell_size > 1e-9 { 1.0 / grid_cell_size } else { 0.0 };
        let grid_dim_x = ((world_width * inv_grid_cell_size).ceil() as u32).clamp(1, MAX_GRID_DIM);
        let grid_dim_y = ((world_height * inv_grid_cell_size).ceil() as u32).clamp(1, MAX_GRID_DIM);

        let placement_cols = ((world_width / unit_size).ceil() as u32).max(1);
        let placement_rows = ((world_height / unit_size).ceil() as u32).max(1);

        SimParams {
            world_width,
            world_height,
            unit_size,
            grid_cell_size,
            inv_grid_cell_size,
            grid_dim_x,
            grid_dim_y,
            placement_cols,
            placement_rows,
            total_population: self.population.total_population,
            infected_at_start: self.infected_at_start(),
            infection_radius,
            infection_chance: self.epidemic.infection_probability as f64 / 100.0,
            death_chance: self.epidemic.death_rate as f64 / 100.0,
            infection_interval: self.epidemic.infection_interval as u64,
            speed: self.speed(),
            turn_probability: self.turn_probability() as f64,
            seed: self.run.seed,
        }
    }
}

fn check_range(field: &'static str, value: f32, min: f64, max: f64) -> std::result::Result<(), ConfigError> {
    let value = value as f64;
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, min, max })
    }
}

fn check_positive(field: &'static str, value: f32) -> std::result::Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value: value as f64 })
    }
}

fn default_world_extent() -> f32 {
    600.0
}

fn default_unit_size() -> f32 {
    30.0
}

fn default_seed() -> u64 {
    42
}

fn default_epoch_interval_ms() -> u64 {
    50
}

fn default_base_filename() -> String {
    "epidemic".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finish::FinishTarget;
    use std::io::Write;

    fn base() -> SimulationConfig {
        SimulationConfig::new(200, 10, 10.0, 10.0, 10.0, 10)
    }

    #[test]
    fn default_parameters_are_valid() {
        assert_eq!(base().validate(), Ok(()));
    }

    #[test]
    fn rejects_empty_population() {
        let mut config = base();
        config.population.total_population = 0;
        config.population.infected_at_start = Some(0);
        assert_eq!(config.validate(), Err(ConfigError::EmptyPopulation));
    }

    #[test]
    fn rejects_more_infected_than_population() {
        let config = SimulationConfig::new(5, 6, 10.0, 10.0, 10.0, 10);
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyInfected { infected: 6, total: 5 })
        );
    }

    #[test]
    fn rejects_rates_outside_percent_range() {
        let mut config = base();
        config.epidemic.infection_probability = 100.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "infection_probability", .. })
        ));

        let mut config = base();
        config.epidemic.death_rate = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "death_rate", .. })
        ));

        let mut config = base();
        config.epidemic.death_rate = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval_and_radius() {
        let mut config = base();
        config.epidemic.infection_interval = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInfectionInterval));

        let mut config = base();
        config.epidemic.infection_radius = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { field: "infection_radius", .. })
        ));
    }

    #[test]
    fn percent_of_population_is_floored() {
        let mut config = base();
        config.population.infected_at_start = None;
        config.population.infected_at_start_percent = Some(10.0);
        config.population.total_population = 205;
        assert_eq!(config.infected_at_start(), 20);

        config.population.infected_at_start = Some(3);
        assert_eq!(config.infected_at_start(), 3);
    }

    #[test]
    fn grid_dimensions_are_capped_for_tiny_radius() {
        let mut config = base();
        config.epidemic.infection_radius = 0.001;
        let params = config.get_sim_params();
        assert_eq!(params.grid_dim_x, MAX_GRID_DIM);
        assert_eq!(params.grid_dim_y, MAX_GRID_DIM);
        assert!(params.grid_cell_size * MAX_GRID_DIM as f32 >= config.world.width);
    }

    #[test]
    fn huge_radius_collapses_to_single_cell() {
        let mut config = base();
        config.epidemic.infection_radius = 10_000.0;
        let params = config.get_sim_params();
        assert_eq!((params.grid_dim_x, params.grid_dim_y), (1, 1));
        assert_eq!(params.infection_chance, 0.1);
    }

    #[test]
    fn loads_toml_with_optional_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[population]
total_population = 50
infected_at_start_percent = 10.0

[epidemic]
infection_probability = 25.0
infection_radius = 12.0
death_rate = 5.0
infection_interval = 7

[run]
seed = 9
epoch_interval_ms = 0

[finish]
condition = "immune"
percent = 40.0
"#
        )
        .unwrap();

        let config = SimulationConfig::load(file.path()).unwrap();
        assert_eq!(config.infected_at_start(), 5);
        assert_eq!(config.run.seed, 9);
        assert_eq!(config.world.width, 600.0);
        assert_eq!(config.speed(), 3.0);
        let finish = config.finish.clone().unwrap();
        assert_eq!(finish.condition, FinishTarget::Immune);
        assert!(config.output.save_assumptions);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SimulationConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
