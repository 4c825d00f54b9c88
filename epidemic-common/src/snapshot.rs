use crate::finish::FinishTarget;
use serde::{Deserialize, Serialize};

/// Display-neutral category of an agent's health, the only health data that leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCategory {
    Healthy,
    Sick,
    Immune,
    Dead,
}

impl HealthCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthCategory::Healthy => "healthy",
            HealthCategory::Sick => "sick",
            HealthCategory::Immune => "immune",
            HealthCategory::Dead => "dead",
        }
    }
}

/// One agent as published on the population stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub category: HealthCategory,
}

/// Every agent at the end of an epoch, ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub epoch: u64,
    pub agents: Vec<AgentSnapshot>,
}

/// Aggregate health counts at the end of an epoch. Healthy is implied by the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpochAssumption {
    pub epoch: u64,
    pub total_population: u32,
    pub dead: u32,
    pub sick: u32,
    pub immune: u32,
}

impl EpochAssumption {
    /// Saturates at 0 for records whose counts exceed the total.
    pub fn healthy(&self) -> u32 {
        self.total_population
            .saturating_sub(self.dead)
            .saturating_sub(self.sick)
            .saturating_sub(self.immune)
    }

    /// Share of the initial population (0-100) currently in `target`.
    pub fn percentage(&self, target: FinishTarget) -> f64 {
        let count = match target {
            FinishTarget::Dead => self.dead,
            FinishTarget::Immune => self.immune,
            FinishTarget::Sick => self.sick,
        };
        if self.total_population == 0 {
            return 0.0;
        }
        count as f64 / self.total_population as f64 * 100.0
    }
}
