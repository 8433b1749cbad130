//! Run-level analysis: per-model statistics, model agreement, dimension
//! impact, variance and contested scenarios, assembled into one
//! [`AnalysisDocument`].
//!
//! [`AnalysisAggregator::compute`] is a pure function of its inputs apart
//! from the two timing fields. Feeding the same outcomes twice yields the same
//! `input_hash` and the same statistical body.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use valuerank_stats::{
    BootstrapStatistic, CiMethod, ConfidenceInterval, GroupTest, ModelAgreement, Summary,
    bootstrap_ci, eta_squared, holm_bonferroni, kruskal_wallis, mean, model_agreement,
    sample_variance, summarize, win_rate, win_rate_ci,
};

use crate::config::EngineConfig;
use crate::grid::DimensionIndex;
use crate::outcome::{DecisionValue, OutcomeRecord, ValueStatus};

/// Written into every document's `methods_used`.
pub const CODE_VERSION: &str = concat!("valuerank-core/", env!("CARGO_PKG_VERSION"));

// ═══════════════════════════════════════════════════════════════════════════════
// Document types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Computing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Computing => "COMPUTING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    SmallSample,
    MalformedDimensions,
    NoNumericDecisions,
    FailedOutcomes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWarning {
    pub code: WarningCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCounts {
    pub prioritized: u64,
    pub deprioritized: u64,
    pub neutral: u64,
}

/// Win rate of one value for one model. Neutral outcomes are not trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueStats {
    pub win_rate: Option<f64>,
    pub confidence_interval: Option<ConfidenceInterval>,
    pub count: ValueCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    /// Successful outcomes.
    pub sample_size: usize,
    pub numeric_count: usize,
    pub failed_count: usize,
    pub overall: Option<Summary>,
    pub mean_ci: Option<ConfidenceInterval>,
    pub categorical_counts: BTreeMap<String, usize>,
    pub values: BTreeMap<String, ValueStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub n: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionEffect {
    /// Eta-squared.
    pub effect_size: f64,
    /// 1 = largest effect.
    pub rank: usize,
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
    pub p_value_corrected: f64,
    pub significant: bool,
    pub levels: BTreeMap<String, LevelStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAnalysis {
    pub dimensions: BTreeMap<String, DimensionEffect>,
    /// Dimension name -> why it could not be tested.
    pub untestable: BTreeMap<String, String>,
    pub variance_explained: f64,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVariance {
    pub total_samples: usize,
    pub unique_scenarios: usize,
    pub scenarios_with_repeats: usize,
    pub avg_within_scenario_variance: Option<f64>,
    pub max_within_scenario_variance: Option<f64>,
    /// `1 - avg / max_possible_variance`, clamped to [0, 1]. `None` without
    /// repeated samples.
    pub consistency_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariablePair {
    pub scenario_id: String,
    pub model_id: String,
    pub variance: f64,
    pub mean: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceAnalysis {
    pub is_multi_sample: bool,
    /// Largest number of numeric samples seen for one (scenario, model).
    pub samples_per_scenario: usize,
    pub per_model: BTreeMap<String, ModelVariance>,
    pub most_variable: Vec<VariablePair>,
    pub least_variable: Vec<VariablePair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestedScenario {
    pub scenario_id: String,
    /// Sample variance of the per-model mean decisions.
    pub variance: f64,
    pub model_means: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodsUsed {
    pub win_rate_ci: String,
    pub mean_ci: String,
    pub model_comparison: String,
    pub p_value_correction: String,
    pub effect_size: String,
    pub dimension_test: String,
    pub alpha: f64,
    pub confidence_level: f64,
    pub bootstrap_rounds: usize,
    pub code_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub run_id: String,
    pub per_model: BTreeMap<String, ModelStats>,
    pub model_agreement: Option<ModelAgreement>,
    pub dimension_analysis: DimensionAnalysis,
    pub variance_analysis: VarianceAnalysis,
    pub most_contested_scenarios: Vec<ContestedScenario>,
    pub methods_used: MethodsUsed,
    pub warnings: Vec<AnalysisWarning>,
    pub outcome_count: usize,
    pub failed_outcome_count: usize,
    pub status: AnalysisStatus,
    pub input_hash: String,
    pub computed_at_ms: u64,
    pub duration_ms: u64,
}

impl AnalysisDocument {
    /// Equality ignoring when and how fast the document was computed.
    pub fn same_statistics(&self, other: &AnalysisDocument) -> bool {
        let strip = |d: &AnalysisDocument| AnalysisDocument {
            computed_at_ms: 0,
            duration_ms: 0,
            ..d.clone()
        };
        strip(self) == strip(other)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Input hash
// ═══════════════════════════════════════════════════════════════════════════════

/// SHA-256 (hex) over the sorted `(scenario, model, decision, created_at)`
/// tuples of the successful outcomes. Input order does not matter.
pub fn input_hash(outcomes: &[OutcomeRecord]) -> String {
    let mut rows: Vec<(&str, &str, String, &str)> = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| {
            (
                o.scenario_id.as_str(),
                o.model_id.as_str(),
                o.decision_value.canonical(),
                o.created_at.as_str(),
            )
        })
        .collect();
    rows.sort();

    let mut h = Sha256::new();
    for (scenario, model, decision, created_at) in &rows {
        for field in [*scenario, *model, decision.as_str(), *created_at] {
            h.update(field.as_bytes());
            h.update([0x1f]);
        }
        h.update([0x1e]);
    }
    to_hex(&h.finalize())
}

/// Key under which a recompute may be skipped.
///
/// Extends [`input_hash`] with everything else a document is computed from:
/// failed outcomes, sample indices, per-value statuses and the parsed
/// dimension levels of every scenario. Two snapshots with the same key yield
/// the same statistical body.
pub fn recompute_cache_key(outcomes: &[OutcomeRecord], dimensions: &DimensionIndex) -> String {
    let mut h = Sha256::new();
    h.update(input_hash(outcomes).as_bytes());
    h.update([0x1d]);
    for o in canonical_order(outcomes) {
        for field in [
            o.scenario_id.as_str(),
            o.model_id.as_str(),
            o.decision_value.canonical().as_str(),
            o.created_at.as_str(),
        ] {
            h.update(field.as_bytes());
            h.update([0x1f]);
        }
        h.update([u8::from(o.success)]);
        h.update(o.sample_index.to_le_bytes());
        for (value_id, status) in &o.values {
            h.update(value_id.as_bytes());
            h.update([0x1f, status_tag(*status)]);
        }
        h.update([0x1e]);
    }
    h.update([0x1d]);
    for (scenario_id, levels) in dimensions.iter() {
        h.update(scenario_id.as_bytes());
        h.update([0x1f, u8::from(dimensions.is_malformed(scenario_id))]);
        for (name, level) in levels {
            h.update(name.as_bytes());
            h.update([0x1f]);
            h.update(level.as_bytes());
            h.update([0x1f]);
        }
        h.update([0x1e]);
    }
    to_hex(&h.finalize())
}

fn status_tag(status: ValueStatus) -> u8 {
    match status {
        ValueStatus::Prioritized => b'+',
        ValueStatus::Deprioritized => b'-',
        ValueStatus::Neutral => b'=',
    }
}

/// Outcomes in hash order, so resampling and float sums see the same
/// sequence however the caller ordered them.
fn canonical_order(outcomes: &[OutcomeRecord]) -> Vec<&OutcomeRecord> {
    let mut ordered: Vec<&OutcomeRecord> = outcomes.iter().collect();
    ordered.sort_by_cached_key(|o| {
        (
            o.scenario_id.clone(),
            o.model_id.clone(),
            o.decision_value.canonical(),
            o.created_at.clone(),
            o.sample_index,
            o.success,
        )
    });
    ordered
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Per-model bootstrap seed derived from the input hash.
fn bootstrap_seed(input_hash: &str, model_id: &str) -> u64 {
    let mut h = Sha256::new();
    h.update(input_hash.as_bytes());
    h.update([0x1f]);
    h.update(model_id.as_bytes());
    let digest = h.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregator
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisAggregator {
    config: EngineConfig,
}

impl AnalysisAggregator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compute(
        &self,
        run_id: &str,
        outcomes: &[OutcomeRecord],
        dimensions: &DimensionIndex,
    ) -> AnalysisDocument {
        let started = Instant::now();
        let hash = input_hash(outcomes);
        let ordered = canonical_order(outcomes);
        let successful: Vec<&OutcomeRecord> =
            ordered.iter().copied().filter(|o| o.success).collect();
        let failed_outcome_count = outcomes.len() - successful.len();

        let per_model = self.per_model_stats(&ordered, &hash);
        let decisions = scenario_means(&successful);
        let model_agreement =
            model_agreement(&decisions, self.config.alpha, self.config.outlier_threshold_sd);
        let dimension_analysis = self.dimension_analysis(&successful, dimensions);
        let variance_analysis = self.variance_analysis(&successful);
        let most_contested_scenarios = contested_scenarios(&decisions, self.config.contested_top_n);
        let warnings = self.warnings(&per_model, dimensions, failed_outcome_count);

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "analysis for run {run_id}: {} outcomes ({} failed), {} models, {} dimensions tested, {duration_ms} ms",
            outcomes.len(),
            failed_outcome_count,
            per_model.len(),
            dimension_analysis.dimensions.len()
        );

        AnalysisDocument {
            run_id: run_id.to_string(),
            per_model,
            model_agreement,
            dimension_analysis,
            variance_analysis,
            most_contested_scenarios,
            methods_used: self.methods_used(),
            warnings,
            outcome_count: outcomes.len(),
            failed_outcome_count,
            status: AnalysisStatus::Completed,
            input_hash: hash,
            computed_at_ms: now_ms(),
            duration_ms,
        }
    }

    fn methods_used(&self) -> MethodsUsed {
        let win_rate_ci = match self.config.win_rate_ci_method {
            CiMethod::Wilson => "wilson_score",
            CiMethod::Wald => "wald",
        };
        MethodsUsed {
            win_rate_ci: win_rate_ci.to_string(),
            mean_ci: "bootstrap_percentile".to_string(),
            model_comparison: "spearman_rho".to_string(),
            p_value_correction: "holm_bonferroni".to_string(),
            effect_size: "cohens_d".to_string(),
            dimension_test: "kruskal_wallis".to_string(),
            alpha: self.config.alpha,
            confidence_level: self.config.confidence_level,
            bootstrap_rounds: self.config.bootstrap_rounds,
            code_version: CODE_VERSION.to_string(),
        }
    }

    /// One scoped thread per model; results are collected into an ordered map
    /// so thread completion order never shows in the output.
    fn per_model_stats(
        &self,
        outcomes: &[&OutcomeRecord],
        input_hash: &str,
    ) -> BTreeMap<String, ModelStats> {
        let mut by_model: BTreeMap<&str, Vec<&OutcomeRecord>> = BTreeMap::new();
        for &o in outcomes {
            by_model.entry(o.model_id.as_str()).or_default().push(o);
        }

        std::thread::scope(|s| {
            let handles: Vec<_> = by_model
                .iter()
                .map(|(model_id, records)| {
                    let seed = bootstrap_seed(input_hash, model_id);
                    let handle = s.spawn(move || self.model_stats(records, seed));
                    (model_id.to_string(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(model_id, handle)| {
                    let stats = handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                    (model_id, stats)
                })
                .collect()
        })
    }

    fn model_stats(&self, records: &[&OutcomeRecord], seed: u64) -> ModelStats {
        let mut numeric = Vec::new();
        let mut categorical_counts = BTreeMap::new();
        let mut counts: BTreeMap<String, ValueCounts> = BTreeMap::new();
        let mut failed_count = 0;
        for o in records {
            if !o.success {
                failed_count += 1;
                continue;
            }
            match &o.decision_value {
                DecisionValue::Numeric(v) => numeric.push(*v),
                DecisionValue::Categorical(code) => {
                    *categorical_counts.entry(code.clone()).or_insert(0) += 1;
                }
            }
            for (value_id, status) in &o.values {
                let c = counts.entry(value_id.clone()).or_default();
                match status {
                    ValueStatus::Prioritized => c.prioritized += 1,
                    ValueStatus::Deprioritized => c.deprioritized += 1,
                    ValueStatus::Neutral => c.neutral += 1,
                }
            }
        }

        let overall = summarize(&numeric).ok();
        let mean_ci = bootstrap_ci(
            &numeric,
            BootstrapStatistic::Mean,
            self.config.confidence_level,
            self.config.bootstrap_rounds,
            seed,
        )
        .ok();

        let values = counts
            .into_iter()
            .map(|(value_id, count)| {
                let stats = ValueStats {
                    win_rate: win_rate(count.prioritized, count.deprioritized),
                    confidence_interval: win_rate_ci(
                        count.prioritized,
                        count.deprioritized,
                        self.config.win_rate_ci_method,
                        self.config.confidence_level,
                    )
                    .ok(),
                    count,
                };
                (value_id, stats)
            })
            .collect();

        ModelStats {
            sample_size: records.len() - failed_count,
            numeric_count: numeric.len(),
            failed_count,
            overall,
            mean_ci,
            categorical_counts,
            values,
        }
    }

    fn dimension_analysis(
        &self,
        successful: &[&OutcomeRecord],
        dimensions: &DimensionIndex,
    ) -> DimensionAnalysis {
        struct Tested {
            name: String,
            test: GroupTest,
            effect: f64,
            levels: BTreeMap<String, LevelStats>,
        }

        let mut tested = Vec::new();
        let mut untestable = BTreeMap::new();
        for name in dimensions.dimension_keys() {
            let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
            for o in successful {
                if let Some(v) = o.decision_value.as_numeric() {
                    groups
                        .entry(dimensions.level(&o.scenario_id, &name))
                        .or_default()
                        .push(v);
                }
            }
            if groups.len() < 2 {
                untestable.insert(
                    name,
                    format!("{} level(s) with numeric decisions; need 2", groups.len()),
                );
                continue;
            }
            let samples: Vec<Vec<f64>> = groups.values().cloned().collect();
            match kruskal_wallis(&samples) {
                Ok(test) => {
                    let levels = groups
                        .iter()
                        .filter_map(|(level, values)| {
                            let m = mean(values).ok()?;
                            Some((level.clone(), LevelStats { n: values.len(), mean: m }))
                        })
                        .collect();
                    tested.push(Tested {
                        name,
                        test,
                        effect: eta_squared(&samples),
                        levels,
                    });
                }
                Err(err) => {
                    untestable.insert(name, err.to_string());
                }
            }
        }

        let p_values: Vec<f64> = tested.iter().map(|t| t.test.p_value).collect();
        let adjusted = holm_bonferroni(&p_values, self.config.alpha);

        let mut by_effect: Vec<usize> = (0..tested.len()).collect();
        by_effect.sort_by(|&i, &j| {
            tested[j]
                .effect
                .total_cmp(&tested[i].effect)
                .then_with(|| tested[i].name.cmp(&tested[j].name))
        });
        let mut rank = vec![0; tested.len()];
        for (r, &idx) in by_effect.iter().enumerate() {
            rank[idx] = r + 1;
        }

        let variance_explained = tested.iter().map(|t| t.effect).sum::<f64>().min(1.0);
        let dimensions = tested
            .into_iter()
            .zip(adjusted)
            .zip(rank)
            .map(|((t, holm), rank)| {
                let effect = DimensionEffect {
                    effect_size: t.effect,
                    rank,
                    statistic: t.test.statistic,
                    df: t.test.df,
                    p_value: t.test.p_value,
                    p_value_corrected: holm.p_adjusted,
                    significant: holm.significant,
                    levels: t.levels,
                };
                (t.name, effect)
            })
            .collect();

        DimensionAnalysis {
            dimensions,
            untestable,
            variance_explained,
            method: "kruskal_wallis".to_string(),
        }
    }

    fn variance_analysis(&self, successful: &[&OutcomeRecord]) -> VarianceAnalysis {
        let mut grouped: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
        for o in successful {
            if let Some(v) = o.decision_value.as_numeric() {
                grouped
                    .entry((o.model_id.as_str(), o.scenario_id.as_str()))
                    .or_default()
                    .push(v);
            }
        }
        let samples_per_scenario = grouped.values().map(Vec::len).max().unwrap_or(0);

        let mut pairs = Vec::new();
        let mut per_model: BTreeMap<String, (ModelVariance, Vec<f64>)> = BTreeMap::new();
        for ((model_id, scenario_id), values) in &grouped {
            let (entry, variances) = per_model.entry(model_id.to_string()).or_insert_with(|| {
                (
                    ModelVariance {
                        total_samples: 0,
                        unique_scenarios: 0,
                        scenarios_with_repeats: 0,
                        avg_within_scenario_variance: None,
                        max_within_scenario_variance: None,
                        consistency_score: None,
                    },
                    Vec::new(),
                )
            });
            entry.total_samples += values.len();
            entry.unique_scenarios += 1;
            let Ok(var) = sample_variance(values) else { continue };
            let Some(var) = var.value() else { continue };
            entry.scenarios_with_repeats += 1;
            variances.push(var);
            pairs.push(VariablePair {
                scenario_id: scenario_id.to_string(),
                model_id: model_id.to_string(),
                variance: var,
                mean: mean(values).unwrap_or(f64::NAN),
                sample_count: values.len(),
            });
        }

        let max_possible = self.config.max_possible_variance;
        let per_model = per_model
            .into_iter()
            .map(|(model_id, (mut stats, variances))| {
                if let Ok(avg) = mean(&variances) {
                    stats.avg_within_scenario_variance = Some(avg);
                    stats.max_within_scenario_variance =
                        variances.iter().copied().reduce(f64::max);
                    stats.consistency_score = Some((1.0 - avg / max_possible).clamp(0.0, 1.0));
                }
                (model_id, stats)
            })
            .collect();

        pairs.sort_by(|a, b| {
            b.variance
                .total_cmp(&a.variance)
                .then_with(|| a.scenario_id.cmp(&b.scenario_id))
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        let top_n = self.config.contested_top_n;
        let most_variable: Vec<VariablePair> = pairs.iter().take(top_n).cloned().collect();
        let least_variable = if pairs.len() > top_n {
            pairs.iter().rev().take(top_n).cloned().collect()
        } else {
            Vec::new()
        };

        VarianceAnalysis {
            is_multi_sample: samples_per_scenario > 1,
            samples_per_scenario,
            per_model,
            most_variable,
            least_variable,
        }
    }

    fn warnings(
        &self,
        per_model: &BTreeMap<String, ModelStats>,
        dimensions: &DimensionIndex,
        failed_outcome_count: usize,
    ) -> Vec<AnalysisWarning> {
        let mut warnings = Vec::new();
        let threshold = self.config.small_sample_threshold;
        for (model_id, stats) in per_model {
            if stats.numeric_count < threshold {
                warnings.push(AnalysisWarning {
                    code: WarningCode::SmallSample,
                    message: format!(
                        "{} numeric decisions (< {threshold}); statistics may be unreliable",
                        stats.numeric_count
                    ),
                    model_id: Some(model_id.clone()),
                });
            }
        }
        if dimensions.malformed_count() > 0 {
            warnings.push(AnalysisWarning {
                code: WarningCode::MalformedDimensions,
                message: format!(
                    "{} scenario(s) had malformed dimension data and were analysed under N/A",
                    dimensions.malformed_count()
                ),
                model_id: None,
            });
        }
        if per_model.values().all(|s| s.numeric_count == 0) {
            warnings.push(AnalysisWarning {
                code: WarningCode::NoNumericDecisions,
                message: "no numeric decisions; mean-based statistics omitted".to_string(),
                model_id: None,
            });
        }
        if failed_outcome_count > 0 {
            warnings.push(AnalysisWarning {
                code: WarningCode::FailedOutcomes,
                message: format!("{failed_outcome_count} failed outcome(s) excluded"),
                model_id: None,
            });
        }
        warnings
    }
}

/// model -> scenario -> mean numeric decision.
fn scenario_means(successful: &[&OutcomeRecord]) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut raw: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
    for o in successful {
        if let Some(v) = o.decision_value.as_numeric() {
            raw.entry(o.model_id.as_str())
                .or_default()
                .entry(o.scenario_id.as_str())
                .or_default()
                .push(v);
        }
    }
    raw.into_iter()
        .map(|(model, scenarios)| {
            let means = scenarios
                .into_iter()
                .filter_map(|(scenario, values)| Some((scenario.to_string(), mean(&values).ok()?)))
                .collect();
            (model.to_string(), means)
        })
        .collect()
}

fn contested_scenarios(
    decisions: &BTreeMap<String, BTreeMap<String, f64>>,
    top_n: usize,
) -> Vec<ContestedScenario> {
    let scenario_ids: BTreeSet<&str> = decisions
        .values()
        .flat_map(|m| m.keys().map(String::as_str))
        .collect();

    let mut contested: Vec<ContestedScenario> = scenario_ids
        .into_iter()
        .filter_map(|scenario_id| {
            let model_means: BTreeMap<String, f64> = decisions
                .iter()
                .filter_map(|(model, m)| m.get(scenario_id).map(|v| (model.clone(), *v)))
                .collect();
            if model_means.len() < 2 {
                return None;
            }
            let means: Vec<f64> = model_means.values().copied().collect();
            let variance = sample_variance(&means).ok()?.value()?;
            Some(ContestedScenario {
                scenario_id: scenario_id.to_string(),
                variance,
                model_means,
            })
        })
        .collect();

    contested.sort_by(|a, b| {
        b.variance
            .total_cmp(&a.variance)
            .then_with(|| a.scenario_id.cmp(&b.scenario_id))
    });
    contested.truncate(top_n);
    contested
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
