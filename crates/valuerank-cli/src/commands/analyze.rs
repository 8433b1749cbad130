use valuerank_core::{AnalysisAggregator, AnalysisDocument, DimensionIndex};

pub fn run(input_path: &str, config_path: Option<&str>, output_path: Option<&str>) {
    let config = super::load_config(config_path);
    let input = super::load_input(input_path);
    let dims = DimensionIndex::from_raw(&input.scenario_dimensions);

    println!(
        "Analyzing run {} ({} outcomes, {} scenarios with dimensions)...",
        input.run_id,
        input.outcomes.len(),
        dims.len()
    );
    let doc = AnalysisAggregator::new(config).compute(&input.run_id, &input.outcomes, &dims);

    print_models(&doc);
    print_agreement(&doc);
    print_dimensions(&doc);
    print_contested(&doc);

    if !doc.warnings.is_empty() {
        println!("\nWarnings:");
        for w in &doc.warnings {
            match &w.model_id {
                Some(m) => println!("  {:?} [{m}]: {}", w.code, w.message),
                None => println!("  {:?}: {}", w.code, w.message),
            }
        }
    }

    println!(
        "\n  input hash {} | computed in {} ms | {}",
        &doc.input_hash[..12],
        doc.duration_ms,
        doc.methods_used.code_version
    );

    if let Some(path) = output_path {
        super::write_json(path, &doc);
    }
}

fn print_models(doc: &AnalysisDocument) {
    println!();
    println!(
        "  {:<28} {:>6} {:>8} {:>10} {:>19}",
        "Model", "N", "Mean", "SEM", "Mean CI"
    );
    println!("  {}", "─".repeat(75));
    for (model_id, stats) in &doc.per_model {
        let (mean, sem) = match &stats.overall {
            Some(s) => (format!("{:.3}", s.mean), super::fmt_estimate(s.sem)),
            None => ("-".to_string(), "-".to_string()),
        };
        let ci = stats
            .mean_ci
            .map_or_else(|| "-".to_string(), |ci| format!("[{:.3}, {:.3}]", ci.lower, ci.upper));
        println!(
            "  {:<28} {:>6} {:>8} {:>10} {:>19}",
            model_id, stats.sample_size, mean, sem, ci
        );
        for (value_id, v) in &stats.values {
            let ci = v
                .confidence_interval
                .map_or_else(String::new, |ci| format!(" [{:.3}, {:.3}]", ci.lower, ci.upper));
            println!(
                "      {value_id:<24} win rate {}{ci}  ({}+ / {}- / {}=)",
                super::fmt_opt(v.win_rate),
                v.count.prioritized,
                v.count.deprioritized,
                v.count.neutral
            );
        }
    }
}

fn print_agreement(doc: &AnalysisDocument) {
    let Some(agreement) = &doc.model_agreement else {
        println!("\nModel agreement: needs at least two models");
        return;
    };
    println!(
        "\nModel agreement (Spearman, Holm-corrected): overall {}",
        super::fmt_opt(agreement.overall_agreement)
    );
    for p in &agreement.pairwise {
        println!(
            "  {} vs {}: rho {} p_adj {} ({} shared){}",
            p.model_a,
            p.model_b,
            super::fmt_opt(p.spearman_rho),
            super::fmt_opt(p.p_value_corrected),
            p.shared_scenarios,
            if p.significant { " *" } else { "" }
        );
    }
    if !agreement.outlier_models.is_empty() {
        println!("  Outliers: {}", agreement.outlier_models.join(", "));
    }
}

fn print_dimensions(doc: &AnalysisDocument) {
    let da = &doc.dimension_analysis;
    if da.dimensions.is_empty() && da.untestable.is_empty() {
        return;
    }
    println!(
        "\nDimension impact ({}), variance explained {:.3}:",
        da.method, da.variance_explained
    );
    let mut ranked: Vec<_> = da.dimensions.iter().collect();
    ranked.sort_by_key(|(_, d)| d.rank);
    for (name, d) in ranked {
        println!(
            "  #{} {name:<20} eta² {:.3}  H {:.2}  p_adj {:.4}{}",
            d.rank,
            d.effect_size,
            d.statistic,
            d.p_value_corrected,
            if d.significant { " *" } else { "" }
        );
    }
    for (name, reason) in &da.untestable {
        println!("  -- {name}: untestable ({reason})");
    }
}

fn print_contested(doc: &AnalysisDocument) {
    if doc.most_contested_scenarios.is_empty() {
        return;
    }
    println!("\nMost contested scenarios:");
    for c in &doc.most_contested_scenarios {
        let means: Vec<String> = c
            .model_means
            .iter()
            .map(|(m, v)| format!("{m}={v:.2}"))
            .collect();
        println!("  {:<20} var {:.3}  {}", c.scenario_id, c.variance, means.join(" "));
    }
}
