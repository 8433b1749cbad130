//! Statistics kernel for model decision evaluations.
//!
//! Pure functions over numeric samples and win/loss counts: descriptive
//! statistics with Bessel-corrected variance, Wilson and bootstrap confidence
//! intervals, Cohen's d, Spearman rank correlation, Kruskal-Wallis group tests
//! and Holm-Bonferroni correction. Every function is total over well-formed
//! input and rejects malformed input with a [`StatsError`] instead of
//! returning `NaN`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors raised at the kernel boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("insufficient data: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A statistic that is only defined above a minimum sample size.
///
/// `Insufficient` is a sentinel and must never be read as zero: a zero SEM
/// would claim perfect stability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimate {
    Value(f64),
    Insufficient { n: usize },
}

impl Estimate {
    pub fn value(self) -> Option<f64> {
        match self {
            Estimate::Value(v) => Some(v),
            Estimate::Insufficient { .. } => None,
        }
    }

    pub fn is_insufficient(self) -> bool {
        matches!(self, Estimate::Insufficient { .. })
    }
}

/// Descriptive statistics for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub n: usize,
    pub mean: f64,
    /// Bessel-corrected; `None` below two samples.
    pub std_dev: Option<f64>,
    pub sem: Estimate,
    pub min: f64,
    pub max: f64,
}

/// Method used to build a confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    WilsonScore,
    Wald,
    BootstrapMean,
    BootstrapMedian,
    BootstrapStdDev,
}

impl IntervalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            IntervalMethod::WilsonScore => "wilson_score",
            IntervalMethod::Wald => "wald",
            IntervalMethod::BootstrapMean => "bootstrap_mean",
            IntervalMethod::BootstrapMedian => "bootstrap_median",
            IntervalMethod::BootstrapStdDev => "bootstrap_std_dev",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
    pub method: IntervalMethod,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Interval method for binomial win rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiMethod {
    #[default]
    Wilson,
    Wald,
}

/// Statistic resampled by [`bootstrap_ci`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStatistic {
    Mean,
    Median,
    StdDev,
}

/// Cohen's d magnitude bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectMagnitude {
    /// Bucket |d|: negligible < 0.2 <= small < 0.5 <= medium < 0.8 <= large.
    pub fn from_abs_d(abs_d: f64) -> Self {
        if abs_d < 0.2 {
            EffectMagnitude::Negligible
        } else if abs_d < 0.5 {
            EffectMagnitude::Small
        } else if abs_d < 0.8 {
            EffectMagnitude::Medium
        } else {
            EffectMagnitude::Large
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSize {
    pub d: f64,
    pub abs_d: f64,
    pub interpretation: EffectMagnitude,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub rho: f64,
    pub p_value: f64,
    pub n: usize,
}

/// Holm-Bonferroni outcome for one p-value, in input order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HolmAdjusted {
    pub p_value: f64,
    pub p_adjusted: f64,
    pub significant: bool,
}

/// Result of a k-sample rank test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupTest {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
    pub n: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

fn require_finite(values: &[f64]) -> Result<(), StatsError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(StatsError::InvalidInput(format!(
            "non-finite value at index {i}"
        ))),
        None => Ok(()),
    }
}

fn require_level(level: f64) -> Result<(), StatsError> {
    if level > 0.0 && level < 1.0 {
        Ok(())
    } else {
        Err(StatsError::InvalidInput(format!(
            "confidence level must be in (0, 1), got {level}"
        )))
    }
}

/// Two-sided critical value of the standard normal for `level`.
fn z_critical(level: f64) -> f64 {
    Normal::standard().inverse_cdf((1.0 + level) / 2.0)
}

fn sum_sq_dev(values: &[f64], center: f64) -> f64 {
    values.iter().map(|x| (x - center) * (x - center)).sum()
}

/// Linear-interpolated quantile of an already sorted slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let idx = q * sorted.len().saturating_sub(1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let t = idx - lo as f64;
        sorted[lo] * (1.0 - t) + sorted[hi] * t
    }
}

/// Average ranks (1-based); ties share the mean of their positions.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]).then(i.cmp(&j)));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let avg = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        start = end;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx) * (a - mx);
        vy += (b - my) * (b - my);
    }
    let denom = (vx * vy).sqrt();
    if denom < 1e-15 {
        None
    } else {
        Some((cov / denom).clamp(-1.0, 1.0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 1. DESCRIPTIVE STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Arithmetic mean. Fails on an empty slice.
pub fn mean(values: &[f64]) -> Result<f64, StatsError> {
    if values.is_empty() {
        return Err(StatsError::InsufficientData { needed: 1, got: 0 });
    }
    require_finite(values)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance with Bessel's correction, `Σ(x-mean)² / (n-1)`.
pub fn sample_variance(values: &[f64]) -> Result<Estimate, StatsError> {
    let m = mean(values)?;
    let n = values.len();
    if n < 2 {
        return Ok(Estimate::Insufficient { n });
    }
    Ok(Estimate::Value(sum_sq_dev(values, m) / (n - 1) as f64))
}

pub fn sample_std_dev(values: &[f64]) -> Result<Estimate, StatsError> {
    Ok(match sample_variance(values)? {
        Estimate::Value(v) => Estimate::Value(v.sqrt()),
        insufficient => insufficient,
    })
}

/// Standard error of the mean, `sqrt(variance / n)`.
///
/// Zero values is a misuse and fails; a single value yields
/// [`Estimate::Insufficient`].
pub fn sem(values: &[f64]) -> Result<Estimate, StatsError> {
    let n = values.len();
    Ok(match sample_variance(values)? {
        Estimate::Value(v) => Estimate::Value((v / n as f64).sqrt()),
        insufficient => insufficient,
    })
}

pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    if values.is_empty() {
        return Err(StatsError::InsufficientData { needed: 1, got: 0 });
    }
    require_finite(values)?;
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Ok(quantile_sorted(&sorted, 0.5))
}

pub fn summarize(values: &[f64]) -> Result<Summary, StatsError> {
    let m = mean(values)?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(Summary {
        n: values.len(),
        mean: m,
        std_dev: sample_std_dev(values)?.value(),
        sem: sem(values)?,
        min,
        max,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// 2. CONFIDENCE INTERVALS
// ═══════════════════════════════════════════════════════════════════════════════

/// Win rate `prioritized / (prioritized + deprioritized)`; neutral outcomes
/// are not part of the denominator. `None` when there are no decisive outcomes.
pub fn win_rate(prioritized: u64, deprioritized: u64) -> Option<f64> {
    let total = prioritized as f64 + deprioritized as f64;
    if total == 0.0 {
        None
    } else {
        Some(prioritized as f64 / total)
    }
}

/// Wilson score interval for a binomial proportion.
///
/// Stays inside `[0, 1]` and behaves well for small `total` and proportions
/// near the edges, unlike the Wald interval.
pub fn wilson_score_ci(
    successes: u64,
    total: u64,
    level: f64,
) -> Result<ConfidenceInterval, StatsError> {
    require_level(level)?;
    if total == 0 {
        return Err(StatsError::InsufficientData { needed: 1, got: 0 });
    }
    if successes > total {
        return Err(StatsError::InvalidInput(format!(
            "successes ({successes}) exceed total ({total})"
        )));
    }
    let n = total as f64;
    let p = successes as f64 / n;
    let z = z_critical(level);
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = (z / denom) * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    Ok(ConfidenceInterval {
        lower: (center - margin).max(0.0),
        upper: (center + margin).min(1.0),
        level,
        method: IntervalMethod::WilsonScore,
    })
}

/// Normal-approximation interval, clamped to `[0, 1]`.
pub fn wald_ci(successes: u64, total: u64, level: f64) -> Result<ConfidenceInterval, StatsError> {
    require_level(level)?;
    if total == 0 {
        return Err(StatsError::InsufficientData { needed: 1, got: 0 });
    }
    if successes > total {
        return Err(StatsError::InvalidInput(format!(
            "successes ({successes}) exceed total ({total})"
        )));
    }
    let n = total as f64;
    let p = successes as f64 / n;
    let margin = z_critical(level) * (p * (1.0 - p) / n).sqrt();
    Ok(ConfidenceInterval {
        lower: (p - margin).max(0.0),
        upper: (p + margin).min(1.0),
        level,
        method: IntervalMethod::Wald,
    })
}

/// Confidence interval for a value's win rate.
pub fn win_rate_ci(
    prioritized: u64,
    deprioritized: u64,
    method: CiMethod,
    level: f64,
) -> Result<ConfidenceInterval, StatsError> {
    let total = prioritized.checked_add(deprioritized).ok_or_else(|| {
        StatsError::InvalidInput(format!(
            "win/loss counts overflow: {prioritized} + {deprioritized}"
        ))
    })?;
    match method {
        CiMethod::Wilson => wilson_score_ci(prioritized, total, level),
        CiMethod::Wald => wald_ci(prioritized, total, level),
    }
}

/// Percentile bootstrap interval.
///
/// The generator is seeded explicitly so identical inputs always produce
/// identical intervals.
pub fn bootstrap_ci(
    values: &[f64],
    statistic: BootstrapStatistic,
    level: f64,
    rounds: usize,
    seed: u64,
) -> Result<ConfidenceInterval, StatsError> {
    require_level(level)?;
    if values.is_empty() {
        return Err(StatsError::InsufficientData { needed: 1, got: 0 });
    }
    if rounds == 0 {
        return Err(StatsError::InvalidInput(
            "bootstrap needs at least one round".to_string(),
        ));
    }
    require_finite(values)?;

    let n = values.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut resample = vec![0.0; n];
    let mut stats = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        for slot in resample.iter_mut() {
            *slot = values[rng.random_range(0..n)];
        }
        let m = resample.iter().sum::<f64>() / n as f64;
        let value = match statistic {
            BootstrapStatistic::Mean => m,
            BootstrapStatistic::Median => {
                resample.sort_by(f64::total_cmp);
                quantile_sorted(&resample, 0.5)
            }
            // Population SD of the resample.
            BootstrapStatistic::StdDev => (sum_sq_dev(&resample, m) / n as f64).sqrt(),
        };
        stats.push(value);
    }
    stats.sort_by(f64::total_cmp);

    let alpha = 1.0 - level;
    let method = match statistic {
        BootstrapStatistic::Mean => IntervalMethod::BootstrapMean,
        BootstrapStatistic::Median => IntervalMethod::BootstrapMedian,
        BootstrapStatistic::StdDev => IntervalMethod::BootstrapStdDev,
    };
    Ok(ConfidenceInterval {
        lower: quantile_sorted(&stats, alpha / 2.0),
        upper: quantile_sorted(&stats, 1.0 - alpha / 2.0),
        level,
        method,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// 3. EFFECT SIZE
// ═══════════════════════════════════════════════════════════════════════════════

/// Cohen's d from group summaries, using the pooled standard deviation.
pub fn cohens_d(
    mean1: f64,
    sd1: f64,
    n1: usize,
    mean2: f64,
    sd2: f64,
    n2: usize,
) -> Result<EffectSize, StatsError> {
    if n1 == 0 || n2 == 0 || n1 + n2 < 3 {
        return Err(StatsError::InsufficientData {
            needed: 3,
            got: n1 + n2,
        });
    }
    require_finite(&[mean1, sd1, mean2, sd2])?;
    if sd1 < 0.0 || sd2 < 0.0 {
        return Err(StatsError::InvalidInput(
            "standard deviation cannot be negative".to_string(),
        ));
    }
    let pooled_var = ((n1 - 1) as f64 * sd1 * sd1 + (n2 - 1) as f64 * sd2 * sd2)
        / (n1 + n2 - 2) as f64;
    let pooled = pooled_var.sqrt();
    let d = if pooled < 1e-15 {
        0.0
    } else {
        (mean1 - mean2) / pooled
    };
    Ok(EffectSize {
        d,
        abs_d: d.abs(),
        interpretation: EffectMagnitude::from_abs_d(d.abs()),
    })
}

/// Cohen's d between two raw samples (each needs at least two values).
pub fn cohens_d_samples(a: &[f64], b: &[f64]) -> Result<EffectSize, StatsError> {
    let sd_a = sample_std_dev(a)?
        .value()
        .ok_or(StatsError::InsufficientData { needed: 2, got: a.len() })?;
    let sd_b = sample_std_dev(b)?
        .value()
        .ok_or(StatsError::InsufficientData { needed: 2, got: b.len() })?;
    cohens_d(mean(a)?, sd_a, a.len(), mean(b)?, sd_b, b.len())
}

// ═══════════════════════════════════════════════════════════════════════════════
// 4. RANK CORRELATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Spearman's rho with a two-sided t-approximation p-value.
///
/// Constant input has no defined correlation and reports `rho = 0, p = 1`.
pub fn spearman(x: &[f64], y: &[f64]) -> Result<Correlation, StatsError> {
    if x.len() != y.len() {
        return Err(StatsError::InvalidInput(format!(
            "length mismatch: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 3 {
        return Err(StatsError::InsufficientData { needed: 3, got: n });
    }
    require_finite(x)?;
    require_finite(y)?;

    let Some(rho) = pearson(&average_ranks(x), &average_ranks(y)) else {
        return Ok(Correlation {
            rho: 0.0,
            p_value: 1.0,
            n,
        });
    };
    let df = (n - 2) as f64;
    let p_value = if 1.0 - rho.abs() < 1e-12 {
        0.0
    } else {
        let t = rho * (df / (1.0 - rho * rho)).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|_| StatsError::InvalidInput(format!("invalid t degrees of freedom {df}")))?;
        (2.0 * dist.sf(t.abs())).min(1.0)
    };
    Ok(Correlation { rho, p_value, n })
}

// ═══════════════════════════════════════════════════════════════════════════════
// 5. MULTIPLE COMPARISONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Holm-Bonferroni step-down correction.
///
/// Adjusted p-values are monotone in the sorted order, so a test is only
/// significant if every smaller p-value was significant too.
pub fn holm_bonferroni(p_values: &[f64], alpha: f64) -> Vec<HolmAdjusted> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| {
        p_values[i]
            .partial_cmp(&p_values[j])
            .unwrap_or(Ordering::Equal)
            .then(i.cmp(&j))
    });

    let mut out = vec![
        HolmAdjusted {
            p_value: 0.0,
            p_adjusted: 1.0,
            significant: false,
        };
        m
    ];
    let mut running = 0.0_f64;
    for (rank, &idx) in order.iter().enumerate() {
        let p = p_values[idx];
        let adj = (p * (m - rank) as f64).min(1.0);
        running = running.max(adj);
        out[idx] = HolmAdjusted {
            p_value: p,
            p_adjusted: running,
            significant: running <= alpha,
        };
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// 6. GROUP TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Kruskal-Wallis H test across groups, tie-corrected.
///
/// Empty groups are ignored. Needs two non-empty groups and three values.
pub fn kruskal_wallis(groups: &[Vec<f64>]) -> Result<GroupTest, StatsError> {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    if groups.len() < 2 {
        return Err(StatsError::InsufficientData {
            needed: 2,
            got: groups.len(),
        });
    }
    let all: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let n = all.len();
    if n < 3 {
        return Err(StatsError::InsufficientData { needed: 3, got: n });
    }
    require_finite(&all)?;

    let ranks = average_ranks(&all);
    let nf = n as f64;
    let mut offset = 0;
    let mut h = 0.0;
    for g in &groups {
        let rank_sum: f64 = ranks[offset..offset + g.len()].iter().sum();
        h += rank_sum * rank_sum / g.len() as f64;
        offset += g.len();
    }
    h = 12.0 / (nf * (nf + 1.0)) * h - 3.0 * (nf + 1.0);

    let mut sorted = all.clone();
    sorted.sort_by(f64::total_cmp);
    let mut ties = 0.0;
    let mut start = 0;
    while start < sorted.len() {
        let mut end = start + 1;
        while end < sorted.len() && sorted[end] == sorted[start] {
            end += 1;
        }
        let t = (end - start) as f64;
        ties += t * t * t - t;
        start = end;
    }
    let correction = 1.0 - ties / (nf * nf * nf - nf);
    let df = groups.len() - 1;
    if correction < 1e-12 {
        // Every value identical.
        return Ok(GroupTest {
            statistic: 0.0,
            df,
            p_value: 1.0,
            n,
        });
    }
    let h = (h / correction).max(0.0);
    let dist = ChiSquared::new(df as f64)
        .map_err(|_| StatsError::InvalidInput(format!("invalid chi-squared df {df}")))?;
    Ok(GroupTest {
        statistic: h,
        df,
        p_value: dist.sf(h),
        n,
    })
}

/// Eta-squared, `SS_between / SS_total`. Zero when undefined.
pub fn eta_squared(groups: &[Vec<f64>]) -> f64 {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    if groups.len() < 2 {
        return 0.0;
    }
    let all: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let grand = all.iter().sum::<f64>() / all.len() as f64;
    let ss_total = sum_sq_dev(&all, grand);
    if ss_total < 1e-15 {
        return 0.0;
    }
    let ss_between: f64 = groups
        .iter()
        .map(|g| {
            let m = g.iter().sum::<f64>() / g.len() as f64;
            g.len() as f64 * (m - grand) * (m - grand)
        })
        .sum();
    (ss_between / ss_total).clamp(0.0, 1.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// 7. MODEL AGREEMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Agreement between one pair of models over the scenarios both answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseAgreement {
    pub model_a: String,
    pub model_b: String,
    pub shared_scenarios: usize,
    /// `None` when fewer than three shared scenarios exist.
    pub spearman_rho: Option<f64>,
    pub p_value: Option<f64>,
    pub p_value_corrected: Option<f64>,
    pub significant: bool,
    pub effect_size: Option<EffectSize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAgreement {
    pub pairwise: Vec<PairwiseAgreement>,
    pub outlier_models: Vec<String>,
    /// Mean of all defined pairwise rhos.
    pub overall_agreement: Option<f64>,
}

/// Pairwise Spearman agreement between models' per-scenario decisions.
///
/// `per_model` maps model id to scenario id to that model's decision score.
/// Returns `None` for fewer than two models. p-values are Holm-corrected
/// across all defined pairs. A model is an outlier when its mean pairwise rho
/// lies more than `outlier_threshold` standard deviations below the mean of
/// all models (needs three or more models).
pub fn model_agreement(
    per_model: &BTreeMap<String, BTreeMap<String, f64>>,
    alpha: f64,
    outlier_threshold: f64,
) -> Option<ModelAgreement> {
    if per_model.len() < 2 {
        return None;
    }
    let models: Vec<&String> = per_model.keys().collect();
    let mut pairwise = Vec::new();
    for (i, a) in models.iter().enumerate() {
        for b in &models[i + 1..] {
            let scores_a = &per_model[*a];
            let scores_b = &per_model[*b];
            let (xs, ys): (Vec<f64>, Vec<f64>) = scores_a
                .iter()
                .filter_map(|(scenario, &x)| scores_b.get(scenario).map(|&y| (x, y)))
                .unzip();
            let corr = spearman(&xs, &ys).ok();
            pairwise.push(PairwiseAgreement {
                model_a: (*a).clone(),
                model_b: (*b).clone(),
                shared_scenarios: xs.len(),
                spearman_rho: corr.map(|c| c.rho),
                p_value: corr.map(|c| c.p_value),
                p_value_corrected: None,
                significant: false,
                effect_size: cohens_d_samples(&xs, &ys).ok(),
            });
        }
    }

    let tested: Vec<usize> = (0..pairwise.len())
        .filter(|&i| pairwise[i].p_value.is_some())
        .collect();
    let p_values: Vec<f64> = tested.iter().filter_map(|&i| pairwise[i].p_value).collect();
    for (&i, adj) in tested.iter().zip(holm_bonferroni(&p_values, alpha)) {
        pairwise[i].p_value_corrected = Some(adj.p_adjusted);
        pairwise[i].significant = adj.significant;
    }

    let rhos: Vec<f64> = pairwise.iter().filter_map(|p| p.spearman_rho).collect();
    let overall_agreement = if rhos.is_empty() {
        None
    } else {
        Some(rhos.iter().sum::<f64>() / rhos.len() as f64)
    };

    Some(ModelAgreement {
        outlier_models: outlier_models(&pairwise, outlier_threshold),
        pairwise,
        overall_agreement,
    })
}

fn outlier_models(pairwise: &[PairwiseAgreement], threshold: f64) -> Vec<String> {
    let mut per_model: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for p in pairwise {
        if let Some(rho) = p.spearman_rho {
            per_model.entry(&p.model_a).or_default().push(rho);
            per_model.entry(&p.model_b).or_default().push(rho);
        }
    }
    if per_model.len() < 3 {
        return Vec::new();
    }
    let means: Vec<(&str, f64)> = per_model
        .iter()
        .map(|(m, v)| (*m, v.iter().sum::<f64>() / v.len() as f64))
        .collect();
    let values: Vec<f64> = means.iter().map(|(_, v)| *v).collect();
    let center = values.iter().sum::<f64>() / values.len() as f64;
    let sd = (sum_sq_dev(&values, center) / (values.len() - 1) as f64).sqrt();
    if sd < 1e-12 {
        return Vec::new();
    }
    means
        .into_iter()
        .filter(|(_, m)| (m - center) / sd < -threshold)
        .map(|(model, _)| model.to_string())
        .collect()
}
