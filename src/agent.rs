use epidemic_common::{clamp, upper_bound_exclusive, AgentSnapshot, HealthCategory, Vec2};
use serde::{Deserialize, Serialize};

/// Stable identifier of an agent, equal to its index in the population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

/// Health of an agent. Only `Sick` carries its infection epoch.
///
/// Transitions are `Healthy -> Sick -> {Immune, Dead}`; Immune and Dead are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Sick { infected_at_epoch: u64 },
    Immune,
    Dead,
}

impl HealthState {
    pub fn category(self) -> HealthCategory {
        match self {
            HealthState::Healthy => HealthCategory::Healthy,
            HealthState::Sick { .. } => HealthCategory::Sick,
            HealthState::Immune => HealthCategory::Immune,
            HealthState::Dead => HealthCategory::Dead,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: HealthState,
}

impl Agent {
    pub fn new(id: AgentId, position: Vec2, velocity: Vec2) -> Self {
        Agent {
            id,
            position,
            velocity,
            health: HealthState::Healthy,
        }
    }

    pub fn is_sick(&self) -> bool {
        matches!(self.health, HealthState::Sick { .. })
    }

    pub fn is_healthy(&self) -> bool {
        self.health == HealthState::Healthy
    }

    pub fn is_dead(&self) -> bool {
        self.health == HealthState::Dead
    }

    /// Epoch at which the agent became Sick, if it is Sick now.
    pub fn infected_at_epoch(&self) -> Option<u64> {
        match self.health {
            HealthState::Sick { infected_at_epoch } => Some(infected_at_epoch),
            _ => None,
        }
    }

    /// Healthy agents become Sick; every other state is left alone.
    /// Returns whether the agent was infected.
    pub fn infect(&mut self, epoch: u64) -> bool {
        if self.is_healthy() {
            self.health = HealthState::Sick {
                infected_at_epoch: epoch,
            };
            true
        } else {
            false
        }
    }

    /// Whether a Sick agent has been contagious for at least `infection_interval` epochs.
    pub fn is_due_for_resolution(&self, epoch: u64, infection_interval: u64) -> bool {
        self.infected_at_epoch()
            .is_some_and(|since| epoch.saturating_sub(since) >= infection_interval)
    }

    /// Moves a Sick agent to its terminal state.
    pub fn resolve(&mut self, dies: bool) {
        if self.is_sick() {
            self.health = if dies { HealthState::Dead } else { HealthState::Immune };
        }
    }

    /// Moves the agent by its velocity, reflecting off the world boundary.
    /// Dead agents stay where they died.
    pub fn advance(&mut self, world_width: f32, world_height: f32) {
        if self.is_dead() {
            return;
        }
        let moved = self.position + self.velocity;
        let (x, vx) = reflect_axis(moved.x, self.velocity.x, world_width);
        let (y, vy) = reflect_axis(moved.y, self.velocity.y, world_height);
        self.position = Vec2::new(x, y);
        self.velocity = Vec2::new(vx, vy);
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.0,
            x: self.position.x,
            y: self.position.y,
            category: self.health.category(),
        }
    }
}

/// Reflects a coordinate that left `[0, extent)` back inside, flipping the velocity
/// component once per bounce.
fn reflect_axis(mut coord: f32, mut velocity: f32, extent: f32) -> (f32, f32) {
    let upper = upper_bound_exclusive(extent);
    // Steps longer than the world bounce at most four times; the clamp covers the rest.
    for _ in 0..4 {
        if coord < 0.0 {
            coord = -coord;
            velocity = -velocity;
        } else if coord > upper {
            coord = 2.0 * upper - coord;
            velocity = -velocity;
        } else {
            break;
        }
    }
    (clamp(coord, 0.0, upper), velocity)
}
