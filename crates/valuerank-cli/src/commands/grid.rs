use valuerank_core::{ConditionGrid, DimensionIndex, StabilityClassifier, StabilitySummary};

pub struct GridCommandConfig<'a> {
    pub input_path: &'a str,
    pub attribute_a: &'a str,
    pub attribute_b: &'a str,
    pub models: Option<&'a str>,
    pub config_path: Option<&'a str>,
}

pub fn run(cfg: GridCommandConfig<'_>) {
    let config = super::load_config(cfg.config_path);
    let input = super::load_input(cfg.input_path);
    let models = super::select_models(cfg.models, &input);
    let dims = DimensionIndex::from_raw(&input.scenario_dimensions);
    let grid = ConditionGrid::build(&input.outcomes, &dims, cfg.attribute_a, cfg.attribute_b);

    println!(
        "Condition grid {} × {}: {} × {} levels, {} conditions, {} models",
        cfg.attribute_a,
        cfg.attribute_b,
        grid.levels_a.len(),
        grid.levels_b.len(),
        grid.conditions.len(),
        models.len()
    );
    for w in &grid.warnings {
        eprintln!("Warning: {w}");
    }
    if grid.excluded_failed > 0 {
        println!("  ({} failed outcomes excluded)", grid.excluded_failed);
    }

    let classifier = StabilityClassifier::from_config(&config);
    let verdicts = classifier.classify_grid(&grid, &models);

    println!();
    println!(
        "  {:<30} {:<24} {:>4} {:>8} {:>14} {:<20} {:>6}",
        "Condition", "Model", "N", "Mean", "SEM", "Status", "Needed"
    );
    println!("  {}", "─".repeat(112));
    for v in &verdicts {
        let mean = grid
            .cell(&v.condition, &v.model_id)
            .and_then(|c| c.mean)
            .map_or_else(|| "-".to_string(), |m| format!("{m:.3}"));
        println!(
            "  {:<30} {:<24} {:>4} {:>8} {:>14} {:<20} {:>6}",
            v.condition.to_string(),
            v.model_id,
            v.sample_count,
            mean,
            super::fmt_estimate(v.sem),
            v.verdict.status.as_str(),
            v.verdict.needed_samples
        );
    }

    let summary = StabilitySummary::from_verdicts(&verdicts);
    println!(
        "\n  {} stable, {} need investigation, {} insufficient, {} chaotic (of {})",
        summary.stable,
        summary.more_investigation,
        summary.insufficient_data,
        summary.chaotic,
        summary.total()
    );
}
