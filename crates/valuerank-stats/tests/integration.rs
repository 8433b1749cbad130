//! Integration tests for valuerank-stats.
//!
//! Exercise the kernel the way the aggregator does: per-model summaries,
//! win-rate intervals, then cross-model agreement with Holm correction.

use std::collections::BTreeMap;

use valuerank_stats::{
    BootstrapStatistic, CiMethod, EffectMagnitude, Estimate, StatsError, bootstrap_ci,
    cohens_d, holm_bonferroni, model_agreement, sem, summarize, win_rate_ci,
};

#[test]
fn sem_shrinks_as_samples_accumulate() {
    let pattern = [2.0, 4.0, 3.0, 5.0, 1.0];
    let mut last = f64::INFINITY;
    for reps in 1..6 {
        let values: Vec<f64> = pattern.iter().cycle().take(pattern.len() * reps).copied().collect();
        let Estimate::Value(s) = sem(&values).unwrap() else {
            panic!("sem undefined for {} samples", values.len());
        };
        assert!(s < last, "sem {s} did not shrink below {last}");
        last = s;
    }
    assert_eq!(sem(&[1.0]).unwrap(), Estimate::Insufficient { n: 1 });
    assert!(matches!(sem(&[]), Err(StatsError::InsufficientData { .. })));
}

#[test]
fn win_rate_interval_for_forty_of_fifty() {
    let ci = win_rate_ci(40, 10, CiMethod::Wilson, 0.95).unwrap();
    assert!((ci.lower - 0.6696).abs() < 1e-3);
    assert!((ci.upper - 0.8876).abs() < 1e-3);
    assert!(ci.contains(0.8));

    let wald = win_rate_ci(40, 10, CiMethod::Wald, 0.95).unwrap();
    assert!(wald.upper - wald.lower > 0.0);
}

#[test]
fn large_effect_between_models() {
    let e = cohens_d(4.0, 0.75, 20, 3.0, 0.75, 20).unwrap();
    assert!((e.d - 1.3333).abs() < 1e-3);
    assert_eq!(e.interpretation, EffectMagnitude::Large);
}

#[test]
fn bootstrap_is_reproducible_with_seed() {
    let values: Vec<f64> = (1..=30).map(|i| (i % 5) as f64).collect();
    let a = bootstrap_ci(&values, BootstrapStatistic::Mean, 0.95, 500, 7).unwrap();
    let b = bootstrap_ci(&values, BootstrapStatistic::Mean, 0.95, 500, 7).unwrap();
    assert_eq!(a, b);
    let s = summarize(&values).unwrap();
    assert!(a.contains(s.mean));
}

#[test]
fn agreement_flags_the_contrarian() {
    let scenarios: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
    let mut per_model: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for (m, noise) in [("a", 0.0), ("b", 0.1), ("c", -0.1), ("d", 0.2)] {
        per_model.insert(
            m.to_string(),
            scenarios
                .iter()
                .enumerate()
                .map(|(i, s)| (s.clone(), i as f64 + noise * (i % 3) as f64))
                .collect(),
        );
    }
    per_model.insert(
        "contrarian".to_string(),
        scenarios
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), (10 - i) as f64))
            .collect(),
    );

    let agreement = model_agreement(&per_model, 0.05, 1.5).unwrap();
    assert_eq!(agreement.pairwise.len(), 10);
    assert_eq!(agreement.outlier_models, vec!["contrarian".to_string()]);
    for pair in &agreement.pairwise {
        if let (Some(p), Some(adj)) = (pair.p_value, pair.p_value_corrected) {
            assert!(adj >= p);
        }
    }
}

#[test]
fn holm_adjusted_values_are_monotone() {
    let adjusted = holm_bonferroni(&[0.04, 0.001, 0.03, 0.2], 0.05);
    let mut by_raw: Vec<_> = adjusted.iter().collect();
    by_raw.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
    for w in by_raw.windows(2) {
        assert!(w[0].p_adjusted <= w[1].p_adjusted);
    }
    assert!(adjusted[1].significant);
    assert!(!adjusted[3].significant);
}
