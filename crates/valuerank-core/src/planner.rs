//! Final-trial planning: how many more samples each (model, condition) needs.
//!
//! The plan is advisory. Nothing here enqueues jobs.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use valuerank_stats::Estimate;

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::grid::{ConditionGrid, ConditionKey};
use crate::stability::{CellVerdict, StabilityClassifier, StabilityStatus};

// Rounding slack when comparing accumulated dollar amounts.
const COST_EPSILON: f64 = 1e-9;

/// Spending cap with a per-job price for every planned model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub max_cost_usd: f64,
    pub cost_per_job: std::collections::BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionPlan {
    pub condition_key: ConditionKey,
    pub status: StabilityStatus,
    pub sample_count: usize,
    pub current_sem: Estimate,
    pub needed_samples: usize,
    /// Equal to `needed_samples` unless a budget cut it.
    pub planned_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPlan {
    pub model_id: String,
    pub conditions: Vec<ConditionPlan>,
    pub total_jobs_for_model: usize,
    pub projected_cost_usd: Option<f64>,
}

/// Demand a budget could not cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDemand {
    pub model_id: String,
    pub condition_key: ConditionKey,
    pub status: StabilityStatus,
    pub skipped_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialPlan {
    pub models: Vec<ModelPlan>,
    pub total_jobs: usize,
    pub projected_cost_usd: Option<f64>,
    pub skipped_for_budget: Vec<SkippedDemand>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrialPlanner {
    classifier: StabilityClassifier,
}

impl TrialPlanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            classifier: StabilityClassifier::from_config(config),
        }
    }

    pub fn with_classifier(classifier: StabilityClassifier) -> Self {
        Self { classifier }
    }

    pub fn plan(
        &self,
        grid: &ConditionGrid,
        models: &[String],
        budget: Option<&Budget>,
    ) -> Result<TrialPlan, CoreError> {
        let mut models_in_order: Vec<String> = Vec::with_capacity(models.len());
        for m in models {
            if !models_in_order.contains(m) {
                models_in_order.push(m.clone());
            }
        }
        if let Some(budget) = budget {
            validate_budget(budget, &models_in_order)?;
        }

        let verdicts = self.classifier.classify_grid(grid, &models_in_order);
        let mut planned: Vec<usize> = verdicts
            .iter()
            .map(|v| {
                if v.verdict.status.wants_samples() {
                    v.verdict.needed_samples
                } else {
                    0
                }
            })
            .collect();

        let mut skipped_for_budget = Vec::new();
        if let Some(budget) = budget {
            let projected: f64 = verdicts
                .iter()
                .zip(&planned)
                .map(|(v, &n)| n as f64 * price(budget, &v.model_id))
                .sum();
            if projected > budget.max_cost_usd + COST_EPSILON {
                info!(
                    "projected cost ${projected:.2} exceeds budget ${:.2}; truncating plan",
                    budget.max_cost_usd
                );
                skipped_for_budget = truncate_to_budget(&verdicts, &mut planned, budget);
            }
        }

        let mut plans: Vec<ModelPlan> = models_in_order
            .iter()
            .map(|model_id| ModelPlan {
                model_id: model_id.clone(),
                conditions: Vec::new(),
                total_jobs_for_model: 0,
                projected_cost_usd: None,
            })
            .collect();
        for (verdict, &planned_samples) in verdicts.iter().zip(&planned) {
            let Some(plan) = plans.iter_mut().find(|p| p.model_id == verdict.model_id) else {
                continue;
            };
            plan.total_jobs_for_model += planned_samples;
            plan.conditions.push(ConditionPlan {
                condition_key: verdict.condition.clone(),
                status: verdict.verdict.status,
                sample_count: verdict.sample_count,
                current_sem: verdict.sem,
                needed_samples: verdict.verdict.needed_samples,
                planned_samples,
            });
        }
        if let Some(budget) = budget {
            for plan in &mut plans {
                plan.projected_cost_usd =
                    Some(plan.total_jobs_for_model as f64 * price(budget, &plan.model_id));
            }
        }

        let total_jobs = plans.iter().map(|p| p.total_jobs_for_model).sum();
        let projected_cost_usd = budget.map(|_| {
            plans
                .iter()
                .filter_map(|p| p.projected_cost_usd)
                .sum::<f64>()
        });
        debug!(
            "planned {total_jobs} jobs across {} models and {} conditions",
            plans.len(),
            grid.conditions.len()
        );
        Ok(TrialPlan {
            models: plans,
            total_jobs,
            projected_cost_usd,
            skipped_for_budget,
        })
    }
}

fn validate_budget(budget: &Budget, models: &[String]) -> Result<(), CoreError> {
    if !(budget.max_cost_usd.is_finite() && budget.max_cost_usd >= 0.0) {
        return Err(CoreError::InvalidBudget(format!(
            "max_cost_usd must be a non-negative number, got {}",
            budget.max_cost_usd
        )));
    }
    for model_id in models {
        match budget.cost_per_job.get(model_id) {
            Some(c) if c.is_finite() && *c >= 0.0 => {}
            Some(c) => {
                return Err(CoreError::InvalidBudget(format!(
                    "cost per job for {model_id} must be non-negative, got {c}"
                )));
            }
            None => {
                return Err(CoreError::InvalidBudget(format!(
                    "no cost per job for model {model_id}"
                )));
            }
        }
    }
    Ok(())
}

fn price(budget: &Budget, model_id: &str) -> f64 {
    budget.cost_per_job.get(model_id).copied().unwrap_or(0.0)
}

fn status_rank(status: StabilityStatus) -> u8 {
    match status {
        StabilityStatus::InsufficientData => 0,
        StabilityStatus::MoreInvestigation => 1,
        StabilityStatus::Stable | StabilityStatus::Chaotic => 2,
    }
}

/// Fund demand in priority order until the money runs out. The first item
/// that does not fit gets as many whole jobs as remain affordable; every
/// later item is skipped.
fn truncate_to_budget(
    verdicts: &[CellVerdict],
    planned: &mut [usize],
    budget: &Budget,
) -> Vec<SkippedDemand> {
    let mut order: Vec<usize> = (0..verdicts.len()).filter(|&i| planned[i] > 0).collect();
    order.sort_by(|&i, &j| {
        let (a, b) = (&verdicts[i], &verdicts[j]);
        status_rank(a.verdict.status)
            .cmp(&status_rank(b.verdict.status))
            .then_with(|| a.condition.to_string().cmp(&b.condition.to_string()))
            .then_with(|| a.model_id.cmp(&b.model_id))
    });

    let mut remaining = budget.max_cost_usd;
    let mut exhausted = false;
    let mut skipped = Vec::new();
    for i in order {
        let verdict = &verdicts[i];
        let wanted = planned[i];
        let unit = price(budget, &verdict.model_id);
        let funded = if exhausted {
            0
        } else if wanted as f64 * unit <= remaining + COST_EPSILON {
            wanted
        } else {
            exhausted = true;
            (((remaining + COST_EPSILON) / unit).floor() as usize).min(wanted)
        };
        remaining -= funded as f64 * unit;
        planned[i] = funded;
        if funded < wanted {
            skipped.push(SkippedDemand {
                model_id: verdict.model_id.clone(),
                condition_key: verdict.condition.clone(),
                status: verdict.verdict.status,
                skipped_samples: wanted - funded,
            });
        }
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DimensionIndex;
    use crate::outcome::{DecisionValue, OutcomeRecord};
    use std::collections::BTreeMap;

    fn dims(levels: &[(&str, &str)]) -> DimensionIndex {
        let mut index = DimensionIndex::new();
        for (scenario, level) in levels {
            index.insert(*scenario, [("a".to_string(), level.to_string())].into());
        }
        index
    }

    fn samples(scenario: &str, model: &str, values: &[f64]) -> Vec<OutcomeRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                OutcomeRecord::new(scenario, model, DecisionValue::Numeric(*v), format!("t{i}"))
            })
            .collect()
    }

    fn budget(max: f64, costs: &[(&str, f64)]) -> Budget {
        Budget {
            max_cost_usd: max,
            cost_per_job: costs.iter().map(|(m, c)| (m.to_string(), *c)).collect(),
        }
    }

    #[test]
    fn test_plan_without_budget() {
        let index = dims(&[("s1", "x"), ("s2", "y")]);
        let mut outcomes = samples("s1", "m1", &[3.0; 10]);
        outcomes.extend(samples("s2", "m1", &[1.0, 2.0, 3.0]));
        let grid = ConditionGrid::build(&outcomes, &index, "a", "b");
        let models = vec!["m1".to_string(), "m2".to_string()];
        let plan = TrialPlanner::default().plan(&grid, &models, None).unwrap();

        assert_eq!(plan.models.len(), 2);
        let m1 = &plan.models[0];
        assert_eq!(m1.conditions[0].status, StabilityStatus::Stable);
        assert_eq!(m1.conditions[0].planned_samples, 0);
        assert_eq!(m1.conditions[1].needed_samples, 7);
        assert_eq!(m1.total_jobs_for_model, 7);
        assert_eq!(plan.models[1].total_jobs_for_model, 20);
        assert_eq!(plan.total_jobs, 27);
        assert!(plan.projected_cost_usd.is_none());
        assert!(plan.skipped_for_budget.is_empty());
    }

    #[test]
    fn test_missing_cost_is_invalid_budget() {
        let index = dims(&[("s1", "x")]);
        let grid = ConditionGrid::build(&[], &index, "a", "b");
        let models = vec!["m1".to_string(), "m2".to_string()];
        let err = TrialPlanner::default()
            .plan(&grid, &models, Some(&budget(10.0, &[("m1", 0.1)])))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidBudget(_)));

        let err = TrialPlanner::default()
            .plan(&grid, &models, Some(&budget(10.0, &[("m1", 0.1), ("m2", -1.0)])))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidBudget(_)));
    }

    #[test]
    fn test_budget_within_limit_is_untouched() {
        let index = dims(&[("s1", "x")]);
        let grid = ConditionGrid::build(&[], &index, "a", "b");
        let models = vec!["m1".to_string()];
        let plan = TrialPlanner::default()
            .plan(&grid, &models, Some(&budget(5.0, &[("m1", 0.5)])))
            .unwrap();
        assert_eq!(plan.total_jobs, 10);
        assert!((plan.projected_cost_usd.unwrap() - 5.0).abs() < 1e-9);
        assert!(plan.skipped_for_budget.is_empty());
    }

    #[test]
    fn test_budget_truncation_order_and_partial_funding() {
        // x|N/A: m1 has 12 noisy samples (MORE_INVESTIGATION, needs 10).
        // y|N/A: nobody has samples (INSUFFICIENT_DATA, needs 10 each).
        let index = dims(&[("s1", "x"), ("s2", "y")]);
        let noisy: Vec<f64> = (0..12).map(|i| if i % 2 == 0 { 1.0 } else { 1.9 }).collect();
        let outcomes = samples("s1", "m1", &noisy);
        let grid = ConditionGrid::build(&outcomes, &index, "a", "b");
        let sem = grid.cells[0].sem.value().unwrap();
        assert!(sem > 0.1 && sem < 0.14, "sem {sem}");

        let models = vec!["m1".to_string(), "m2".to_string()];
        // Demand in priority order: (x, m2), (y, m1), (y, m2) are
        // INSUFFICIENT_DATA at 10 each; (x, m1) is MORE_INVESTIGATION at 10.
        // At $1/job with $25 the third item gets 5 jobs and the fourth none.
        let b = budget(25.0, &[("m1", 1.0), ("m2", 1.0)]);
        let plan = TrialPlanner::default().plan(&grid, &models, Some(&b)).unwrap();
        assert_eq!(plan.total_jobs, 25);

        let skipped: Vec<(String, String, usize)> = plan
            .skipped_for_budget
            .iter()
            .map(|s| (s.model_id.clone(), s.condition_key.to_string(), s.skipped_samples))
            .collect();
        assert_eq!(
            skipped,
            vec![
                ("m2".to_string(), "y|N/A".to_string(), 5),
                ("m1".to_string(), "x|N/A".to_string(), 10),
            ]
        );

        let again = TrialPlanner::default().plan(&grid, &models, Some(&b)).unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn test_first_unaffordable_item_stops_funding() {
        let index = dims(&[("s1", "x"), ("s2", "y")]);
        let grid = ConditionGrid::build(&[], &index, "a", "b");
        let models = vec!["cheap".to_string(), "pricey".to_string()];
        // Order: (x, cheap), (x, pricey), (y, cheap), (y, pricey).
        // $1 buys all of (x, cheap), none of (x, pricey); (y, cheap) would
        // fit but comes after the cut.
        let b = budget(1.0, &[("cheap", 0.1), ("pricey", 10.0)]);
        let plan = TrialPlanner::default().plan(&grid, &models, Some(&b)).unwrap();
        let totals: BTreeMap<_, _> = plan
            .models
            .iter()
            .map(|m| (m.model_id.clone(), m.total_jobs_for_model))
            .collect();
        assert_eq!(totals["cheap"], 10);
        assert_eq!(totals["pricey"], 0);
        assert_eq!(plan.skipped_for_budget.len(), 3);
        assert!(plan.projected_cost_usd.unwrap() <= 1.0 + 1e-9);
    }
}
