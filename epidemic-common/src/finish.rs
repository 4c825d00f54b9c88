use crate::snapshot::EpochAssumption;
use serde::{Deserialize, Serialize};

/// Health state a finish condition watches.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishTarget {
    Dead,
    Immune,
    Sick,
}

/// Stops a run once the target state's share of the population reaches `percent`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FinishCondition {
    pub condition: FinishTarget,
    pub percent: f32,
}

impl FinishCondition {
    pub fn new(condition: FinishTarget, percent: f32) -> Self {
        FinishCondition { condition, percent }
    }

    /// The share is measured against the fixed initial population, Dead agents included.
    pub fn is_met(&self, assumption: &EpochAssumption) -> bool {
        assumption.percentage(self.condition) >= self.percent as f64
    }
}
