//! Sequential stopping rule for (condition, model) cells.
//!
//! | state              | entry                                   | needed            |
//! |--------------------|-----------------------------------------|-------------------|
//! | INSUFFICIENT_DATA  | n < target, or SEM undefined            | target - n        |
//! | STABLE             | n >= target, sem <= stability           | 0                 |
//! | MORE_INVESTIGATION | n >= target, stability < sem < chaotic  | increment         |
//! | CHAOTIC            | n >= target, sem >= chaotic             | 0 (manual review) |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use valuerank_stats::Estimate;

use crate::config::EngineConfig;
use crate::grid::{Cell, ConditionGrid, ConditionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StabilityStatus {
    InsufficientData,
    MoreInvestigation,
    Stable,
    Chaotic,
}

impl StabilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StabilityStatus::InsufficientData => "INSUFFICIENT_DATA",
            StabilityStatus::MoreInvestigation => "MORE_INVESTIGATION",
            StabilityStatus::Stable => "STABLE",
            StabilityStatus::Chaotic => "CHAOTIC",
        }
    }

    /// Whether the planner should schedule more samples.
    pub fn wants_samples(self) -> bool {
        matches!(
            self,
            StabilityStatus::InsufficientData | StabilityStatus::MoreInvestigation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityVerdict {
    pub status: StabilityStatus,
    pub needed_samples: usize,
}

/// Verdict for one grid position, including positions with no cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellVerdict {
    pub condition: ConditionKey,
    pub model_id: String,
    pub sample_count: usize,
    pub sem: Estimate,
    pub verdict: StabilityVerdict,
}

/// Counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilitySummary {
    pub insufficient_data: usize,
    pub more_investigation: usize,
    pub stable: usize,
    pub chaotic: usize,
}

impl StabilitySummary {
    pub fn from_verdicts<'a>(verdicts: impl IntoIterator<Item = &'a CellVerdict>) -> Self {
        let mut summary = Self::default();
        for v in verdicts {
            match v.verdict.status {
                StabilityStatus::InsufficientData => summary.insufficient_data += 1,
                StabilityStatus::MoreInvestigation => summary.more_investigation += 1,
                StabilityStatus::Stable => summary.stable += 1,
                StabilityStatus::Chaotic => summary.chaotic += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.insufficient_data + self.more_investigation + self.stable + self.chaotic
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityClassifier {
    pub target_n: usize,
    pub stability_threshold: f64,
    pub investigation_threshold: f64,
    pub investigation_increment: usize,
}

impl Default for StabilityClassifier {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl StabilityClassifier {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            target_n: config.target_samples_per_condition,
            stability_threshold: config.stability_threshold_sem,
            investigation_threshold: config.investigation_threshold_sem,
            investigation_increment: config.investigation_increment,
        }
    }

    pub fn classify(&self, n: usize, sem: Estimate) -> StabilityVerdict {
        let insufficient = |needed: usize| StabilityVerdict {
            status: StabilityStatus::InsufficientData,
            needed_samples: needed,
        };
        if n < self.target_n {
            return insufficient(self.target_n - n);
        }
        let Some(sem) = sem.value() else {
            // n >= target but no SEM; only reachable when the estimate was
            // computed from fewer values than `n` claims.
            return insufficient(2usize.saturating_sub(n).max(1));
        };
        if sem <= self.stability_threshold {
            StabilityVerdict {
                status: StabilityStatus::Stable,
                needed_samples: 0,
            }
        } else if sem < self.investigation_threshold {
            StabilityVerdict {
                status: StabilityStatus::MoreInvestigation,
                needed_samples: self.investigation_increment,
            }
        } else {
            // Includes a NaN SEM, which cannot be trusted as stable.
            StabilityVerdict {
                status: StabilityStatus::Chaotic,
                needed_samples: 0,
            }
        }
    }

    pub fn classify_cell(&self, cell: &Cell) -> StabilityVerdict {
        self.classify(cell.sample_count, cell.sem)
    }

    /// Verdicts for every realised condition × every requested model, in
    /// condition then model order. Positions without a cell need a full
    /// target's worth of samples.
    pub fn classify_grid(&self, grid: &ConditionGrid, models: &[String]) -> Vec<CellVerdict> {
        let by_position: BTreeMap<(&ConditionKey, &str), &Cell> = grid
            .cells
            .iter()
            .map(|c| ((&c.condition, c.model_id.as_str()), c))
            .collect();

        let mut out = Vec::with_capacity(grid.conditions.len() * models.len());
        for condition in &grid.conditions {
            for model_id in models {
                let verdict = match by_position.get(&(condition, model_id.as_str())) {
                    Some(cell) => CellVerdict {
                        condition: condition.clone(),
                        model_id: model_id.clone(),
                        sample_count: cell.sample_count,
                        sem: cell.sem,
                        verdict: self.classify_cell(cell),
                    },
                    None => CellVerdict {
                        condition: condition.clone(),
                        model_id: model_id.clone(),
                        sample_count: 0,
                        sem: Estimate::Insufficient { n: 0 },
                        verdict: StabilityVerdict {
                            status: StabilityStatus::InsufficientData,
                            needed_samples: self.target_n,
                        },
                    },
                };
                out.push(verdict);
            }
        }
        out
    }
}
