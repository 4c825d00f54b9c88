use crate::agent::{Agent, AgentId};
use crate::error::EngineError;
use crate::grid::SpatialIndex;
use epidemic_common::{
    upper_bound_exclusive, EpochAssumption, HealthCategory, PopulationSnapshot, SimParams,
    SimulationConfig, Vec2,
};
use log::{debug, error, info, trace};
use rand::prelude::*;
use rand::seq::index;
use rand_distr::UnitCircle;
use rayon::prelude::*;
use std::time::Instant;

/// Owns the agent population of one run and advances it one epoch at a time.
///
/// All randomness comes from the engine's own `StdRng`, seeded from `run.seed`, plus
/// per-agent movement streams derived from the same seed. Identical config and seed give
/// identical epochs.
pub struct EpidemicEngine {
    config: SimulationConfig,
    params: SimParams,
    agents: Vec<Agent>,
    index: SpatialIndex,
    rng: StdRng,
    /// Number of completed epochs; 0 is the initial state.
    epoch: u64,
    // Scratch buffer for index rebuilds
    positions: Vec<Vec2>,
}

impl EpidemicEngine {
    /// Validates `config` and creates the initial population.
    pub fn initialize(config: SimulationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let params = config.get_sim_params();
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut agents = place_initial_agents(&params, &mut rng);
        let num_agents = agents.len();
        for idx in index::sample(&mut rng, num_agents, params.infected_at_start as usize) {
            agents[idx].infect(0);
        }

        info!(
            "Initialized {} agents ({} sick) in a {}x{} world, seed {}.",
            num_agents, params.infected_at_start, params.world_width, params.world_height, params.seed
        );
        debug!(
            "Spatial grid: {}x{} cells of {:.2} units.",
            params.grid_dim_x, params.grid_dim_y, params.grid_cell_size
        );

        let index = SpatialIndex::new(&params);
        Ok(EpidemicEngine {
            config,
            params,
            agents,
            index,
            rng,
            epoch: 0,
            positions: Vec::with_capacity(num_agents),
        })
    }

    /// Advances one epoch: movement, infection spread, resolution, aggregation, in that order.
    pub fn advance_epoch(&mut self) -> (PopulationSnapshot, EpochAssumption) {
        let step_start_time = Instant::now();
        self.epoch += 1;

        self.move_agents();
        let newly_infected = self.spread_infection();
        let resolved = self.resolve_infections();
        let assumption = self.assumption();

        debug!(
            "Epoch {}: +{} sick, {} resolved | sick {} immune {} dead {}",
            self.epoch, newly_infected, resolved, assumption.sick, assumption.immune, assumption.dead
        );
        trace!(
            "Epoch {} completed in {:.3} ms",
            self.epoch,
            step_start_time.elapsed().as_secs_f64() * 1000.0
        );

        (self.snapshot(), assumption)
    }

    /// Step 1. Non-Dead agents may pick a new heading, then move and bounce off walls.
    fn move_agents(&mut self) {
        let SimParams {
            world_width,
            world_height,
            speed,
            turn_probability,
            seed,
            ..
        } = self.params;
        let epoch = self.epoch;

        self.agents.par_iter_mut().for_each(|agent| {
            if agent.is_dead() {
                return;
            }
            if turn_probability > 0.0 {
                let mut rng = StdRng::seed_from_u64(movement_seed(seed, agent.id, epoch));
                if rng.random_bool(turn_probability) {
                    agent.velocity = random_velocity(&mut rng, speed);
                }
            }
            agent.advance(world_width, world_height);
        });
    }

    /// Step 2. Sources are the agents Sick at this point; agents infected during the
    /// step neither spread nor get drawn for again. Returns the number of new infections.
    fn spread_infection(&mut self) -> u32 {
        self.positions.clear();
        self.positions.extend(self.agents.iter().map(|agent| agent.position));
        self.index.rebuild(&self.positions);

        let sources: Vec<usize> = self
            .agents
            .iter()
            .enumerate()
            .filter(|(_, agent)| agent.is_sick())
            .map(|(idx, _)| idx)
            .collect();

        let epoch = self.epoch;
        let radius = self.params.infection_radius;
        let chance = self.params.infection_chance;
        let agents = &mut self.agents;
        let rng = &mut self.rng;
        let mut newly_infected = 0;

        for source in sources {
            let center = agents[source].position;
            self.index.for_each_within(center, radius, |neighbor| {
                let target = &mut agents[neighbor as usize];
                if target.is_healthy() && rng.random_bool(chance) {
                    target.infect(epoch);
                    newly_infected += 1;
                }
                true
            });
        }
        newly_infected
    }

    /// Step 3. Sick agents past their interval die or become immune on a single draw.
    /// Returns the number of resolved agents.
    fn resolve_infections(&mut self) -> u32 {
        let epoch = self.epoch;
        let interval = self.params.infection_interval;
        let death_chance = self.params.death_chance;
        let mut resolved = 0;

        for agent in self.agents.iter_mut() {
            if agent.is_due_for_resolution(epoch, interval) {
                let dies = self.rng.random_bool(death_chance);
                agent.resolve(dies);
                resolved += 1;
            }
        }
        resolved
    }

    /// Step 4. Counts of the current state.
    ///
    /// # Panics
    /// If the population drifted from its configured size or the counts do not add up,
    /// both of which mean an epoch step is broken.
    pub fn assumption(&self) -> EpochAssumption {
        let mut counts = [0u32; 4];
        for agent in &self.agents {
            let slot = match agent.health.category() {
                HealthCategory::Healthy => 0,
                HealthCategory::Sick => 1,
                HealthCategory::Immune => 2,
                HealthCategory::Dead => 3,
            };
            counts[slot] += 1;
        }
        let [healthy, sick, immune, dead] = counts;
        let total = self.params.total_population;

        if self.agents.len() != total as usize || healthy + sick + immune + dead != total {
            error!(
                "Population invariant violated at epoch {}: {} agents, healthy {} + sick {} + immune {} + dead {} != {}",
                self.epoch,
                self.agents.len(),
                healthy,
                sick,
                immune,
                dead,
                total
            );
            panic!("population conservation violated at epoch {}", self.epoch);
        }

        EpochAssumption {
            epoch: self.epoch,
            total_population: total,
            dead,
            sick,
            immune,
        }
    }

    /// Every agent's id, position and health category.
    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot {
            epoch: self.epoch,
            agents: self.agents.iter().map(Agent::snapshot).collect(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}

/// Places agents in shuffled `unit_size` bins with a jittered position inside each bin.
/// When there are fewer bins than agents the shuffled bins are reused in order.
fn place_initial_agents(params: &SimParams, rng: &mut StdRng) -> Vec<Agent> {
    let count = params.total_population as usize;
    let cols = params.placement_cols as usize;
    let num_bins = cols.saturating_mul(params.placement_rows as usize);

    let bins: Vec<usize> = if num_bins >= count {
        index::sample(rng, num_bins, count).into_vec()
    } else {
        let mut bins: Vec<usize> = (0..num_bins).collect();
        bins.shuffle(rng);
        bins
    };

    let x_upper = upper_bound_exclusive(params.world_width);
    let y_upper = upper_bound_exclusive(params.world_height);
    let unit = params.unit_size;

    (0..count)
        .map(|i| {
            let bin = bins[i % bins.len()];
            let x0 = (bin % cols) as f32 * unit;
            let y0 = (bin / cols) as f32 * unit;
            let x = jitter(rng, x0, (x0 + unit).min(x_upper));
            let y = jitter(rng, y0, (y0 + unit).min(y_upper));
            let velocity = random_velocity(rng, params.speed);
            Agent::new(AgentId(i as u32), Vec2::new(x, y), velocity)
        })
        .collect()
}

fn jitter(rng: &mut StdRng, low: f32, high: f32) -> f32 {
    if high > low {
        rng.random_range(low..high)
    } else {
        low.min(high)
    }
}

/// Uniformly random heading with magnitude `speed`.
fn random_velocity<R: Rng + ?Sized>(rng: &mut R, speed: f32) -> Vec2 {
    let [dx, dy]: [f32; 2] = UnitCircle.sample(rng);
    Vec2::new(dx, dy) * speed
}

/// Seed of the movement stream for one agent in one epoch.
#[inline(always)]
fn movement_seed(seed: u64, id: AgentId, epoch: u64) -> u64 {
    seed ^ (id.0 as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ epoch.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::HealthState;
    use epidemic_common::ConfigError;

    fn config(total: u32, infected: u32, probability: f32, radius: f32, death: f32, interval: u32) -> SimulationConfig {
        SimulationConfig::new(total, infected, probability, radius, death, interval)
    }

    #[test]
    fn initialize_marks_exactly_the_configured_sick_count() {
        let engine = EpidemicEngine::initialize(config(200, 17, 10.0, 10.0, 10.0, 10)).unwrap();
        assert_eq!(engine.agents().len(), 200);
        assert_eq!(engine.params().infected_at_start, 17);
        let sick: Vec<_> = engine.agents().iter().filter(|a| a.is_sick()).collect();
        assert_eq!(sick.len(), 17);
        assert!(sick.iter().all(|a| a.infected_at_epoch() == Some(0)));
        assert_eq!(engine.epoch(), 0);

        let assumption = engine.assumption();
        assert_eq!((assumption.sick, assumption.healthy()), (17, 183));
    }

    #[test]
    fn initialize_places_agents_inside_the_world() {
        let mut cfg = config(500, 0, 10.0, 10.0, 10.0, 10);
        cfg.world.width = 90.0;
        cfg.world.height = 45.0;
        cfg.world.unit_size = 30.0; // 3x2 bins, reused for every agent
        let engine = EpidemicEngine::initialize(cfg).unwrap();
        for agent in engine.agents() {
            assert!(agent.position.x >= 0.0 && agent.position.x < 90.0);
            assert!(agent.position.y >= 0.0 && agent.position.y < 45.0);
            assert!((agent.velocity.length() - 3.0).abs() < 1e-3);
        }
    }

    #[test]
    fn ids_are_stable_and_unique() {
        let mut engine = EpidemicEngine::initialize(config(50, 5, 50.0, 20.0, 10.0, 3)).unwrap();
        for _ in 0..10 {
            let (snapshot, _) = engine.advance_epoch();
            let ids: Vec<u32> = snapshot.agents.iter().map(|a| a.id).collect();
            assert_eq!(ids, (0..50).collect::<Vec<u32>>());
        }
    }

    #[test]
    fn initialize_rejects_invalid_config() {
        let result = EpidemicEngine::initialize(config(10, 11, 10.0, 10.0, 10.0, 10));
        assert!(matches!(
            result,
            Err(EngineError::InvalidConfig(ConfigError::TooManyInfected { infected: 11, total: 10 }))
        ));
        assert!(EpidemicEngine::initialize(config(0, 0, 10.0, 10.0, 10.0, 10)).is_err());
        assert!(EpidemicEngine::initialize(config(10, 1, 101.0, 10.0, 10.0, 10)).is_err());
        assert!(EpidemicEngine::initialize(config(10, 1, 10.0, 10.0, -0.5, 10)).is_err());
    }

    #[test]
    fn everyone_sick_with_short_interval_resolves_in_one_epoch() {
        let mut engine = EpidemicEngine::initialize(config(10, 10, 10.0, 10.0, 30.0, 1)).unwrap();
        let (_, assumption) = engine.advance_epoch();
        assert_eq!(assumption.sick, 0);
        assert_eq!(assumption.dead + assumption.immune, 10);
        assert_eq!(assumption.epoch, 1);
    }

    #[test]
    fn certain_death_and_certain_recovery() {
        let mut engine = EpidemicEngine::initialize(config(20, 20, 0.0, 10.0, 100.0, 1)).unwrap();
        assert_eq!(engine.advance_epoch().1.dead, 20);

        let mut engine = EpidemicEngine::initialize(config(20, 20, 0.0, 10.0, 0.0, 1)).unwrap();
        assert_eq!(engine.advance_epoch().1.immune, 20);
    }

    #[test]
    fn resolution_waits_for_the_interval() {
        let mut engine = EpidemicEngine::initialize(config(30, 30, 0.0, 10.0, 50.0, 4)).unwrap();
        for epoch in 1..4 {
            let (_, assumption) = engine.advance_epoch();
            assert_eq!(assumption.sick, 30, "epoch {epoch}");
        }
        let (_, assumption) = engine.advance_epoch();
        assert_eq!(assumption.sick, 0);
    }

    #[test]
    fn dead_agents_keep_their_position() {
        let mut engine = EpidemicEngine::initialize(config(15, 15, 0.0, 10.0, 100.0, 1)).unwrap();
        let (first, _) = engine.advance_epoch();
        for _ in 0..5 {
            let (later, _) = engine.advance_epoch();
            assert_eq!(later.agents, first.agents);
        }
        assert!(engine.agents().iter().all(|a| a.health == HealthState::Dead));
    }

    #[test]
    fn full_coverage_infects_everyone_in_one_epoch() {
        let mut cfg = config(300, 1, 100.0, 1_000.0, 0.0, 1_000);
        cfg.world.width = 500.0;
        cfg.world.height = 500.0;
        let mut engine = EpidemicEngine::initialize(cfg).unwrap();
        let (_, assumption) = engine.advance_epoch();
        assert_eq!(assumption.sick, 300);

        let newly_sick = engine
            .agents()
            .iter()
            .filter(|a| a.infected_at_epoch() == Some(1))
            .count();
        assert_eq!(newly_sick, 299);
    }

    #[test]
    fn each_source_gets_its_own_draw() {
        // Two sources cover every target, so a target escapes with (1 - p)^2, not (1 - p).
        let mut infected = 0;
        let mut targets = 0;
        for seed in 0..20 {
            let mut cfg = config(202, 2, 50.0, 10_000.0, 0.0, 1_000);
            cfg.run.seed = seed;
            let mut engine = EpidemicEngine::initialize(cfg).unwrap();
            let (_, assumption) = engine.advance_epoch();
            infected += assumption.sick - 2;
            targets += 200;
        }
        let rate = infected as f64 / targets as f64;
        assert!((0.70..0.80).contains(&rate), "infection rate {rate}");

        let mut cfg = config(202, 2, 50.0, 10_000.0, 0.0, 1_000);
        cfg.run.seed = 7;
        let first = EpidemicEngine::initialize(cfg.clone()).unwrap().advance_epoch().1;
        let again = EpidemicEngine::initialize(cfg).unwrap().advance_epoch().1;
        assert_eq!(first, again);
    }

    #[test]
    fn movement_draws_are_independent_of_thread_scheduling() {
        let mut cfg = config(400, 0, 0.0, 10.0, 0.0, 5);
        cfg.movement.turn_probability = Some(0.5);
        let mut a = EpidemicEngine::initialize(cfg.clone()).unwrap();
        let mut b = EpidemicEngine::initialize(cfg).unwrap();
        for _ in 0..20 {
            assert_eq!(a.advance_epoch(), b.advance_epoch());
        }
    }

    #[test]
    fn movement_seeds_differ_per_agent_and_epoch() {
        assert_ne!(movement_seed(1, AgentId(0), 1), movement_seed(1, AgentId(1), 1));
        assert_ne!(movement_seed(1, AgentId(0), 1), movement_seed(1, AgentId(0), 2));
        assert_ne!(movement_seed(1, AgentId(1), 2), movement_seed(1, AgentId(2), 1));
    }
}
