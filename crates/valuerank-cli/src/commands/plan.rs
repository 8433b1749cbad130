use valuerank_core::{Budget, ConditionGrid, DimensionIndex, TrialPlanner};

pub struct PlanCommandConfig<'a> {
    pub input_path: &'a str,
    pub attribute_a: &'a str,
    pub attribute_b: &'a str,
    pub models: Option<&'a str>,
    pub budget_usd: Option<f64>,
    pub costs: &'a [String],
    pub config_path: Option<&'a str>,
    pub output_path: Option<&'a str>,
}

pub fn run(cfg: PlanCommandConfig<'_>) {
    let config = super::load_config(cfg.config_path);
    let input = super::load_input(cfg.input_path);
    let models = super::select_models(cfg.models, &input);
    let dims = DimensionIndex::from_raw(&input.scenario_dimensions);
    let grid = ConditionGrid::build(&input.outcomes, &dims, cfg.attribute_a, cfg.attribute_b);

    let cost_per_job = super::parse_costs(cfg.costs).unwrap_or_else(|e| super::fail(e));
    let budget = match cfg.budget_usd {
        Some(max_cost_usd) => Some(Budget {
            max_cost_usd,
            cost_per_job,
        }),
        None => {
            if !cost_per_job.is_empty() {
                eprintln!("Warning: --cost given without --budget-usd; costs ignored");
            }
            None
        }
    };

    let plan = TrialPlanner::new(&config)
        .plan(&grid, &models, budget.as_ref())
        .unwrap_or_else(|e| super::fail(e));

    println!(
        "Final-trial plan for run {} ({} × {}):",
        input.run_id, cfg.attribute_a, cfg.attribute_b
    );
    for m in &plan.models {
        let cost = m
            .projected_cost_usd
            .map_or_else(String::new, |c| format!(", ${c:.2}"));
        println!("\n  {} — {} jobs{cost}", m.model_id, m.total_jobs_for_model);
        for c in m.conditions.iter().filter(|c| c.needed_samples > 0) {
            let cut = if c.planned_samples < c.needed_samples {
                format!(" (budget: {} of {})", c.planned_samples, c.needed_samples)
            } else {
                String::new()
            };
            println!(
                "    {:<30} {:<20} n={:<4} sem {:<14} +{}{cut}",
                c.condition_key.to_string(),
                c.status.as_str(),
                c.sample_count,
                super::fmt_estimate(c.current_sem),
                c.planned_samples
            );
        }
    }

    println!("\n  Total: {} jobs", plan.total_jobs);
    if let Some(cost) = plan.projected_cost_usd {
        println!("  Projected cost: ${cost:.2}");
    }
    if !plan.skipped_for_budget.is_empty() {
        let skipped: usize = plan
            .skipped_for_budget
            .iter()
            .map(|s| s.skipped_samples)
            .sum();
        println!(
            "  Skipped for budget: {skipped} samples across {} cells",
            plan.skipped_for_budget.len()
        );
    }

    if let Some(path) = cfg.output_path {
        super::write_json(path, &plan);
    }
}
