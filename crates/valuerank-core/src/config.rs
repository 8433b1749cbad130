//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it
//! overrides. The stability thresholds and target sample size are defaults
//! carried over from the review dashboard, not derived from a significance
//! level.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use valuerank_stats::CiMethod;

use crate::error::CoreError;

/// Tunable constants for classification, planning, analysis and debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples a condition needs before its SEM is trusted.
    pub target_samples_per_condition: usize,
    /// SEM at or below which a condition is stable.
    pub stability_threshold_sem: f64,
    /// SEM at or above which a condition is chaotic.
    pub investigation_threshold_sem: f64,
    /// Samples added to a condition under investigation.
    pub investigation_increment: usize,
    /// Quiet period that collapses bursts of recompute triggers.
    pub debounce_window_ms: u64,
    pub confidence_level: f64,
    /// Family-wise significance level for Holm-corrected tests.
    pub alpha: f64,
    /// Standard deviations below the mean agreement that mark an outlier model.
    pub outlier_threshold_sd: f64,
    pub contested_top_n: usize,
    /// Per-model sample size below which a warning is attached.
    pub small_sample_threshold: usize,
    pub bootstrap_rounds: usize,
    /// Upper bound of within-scenario variance on the decision scale (1-5 scale).
    pub max_possible_variance: f64,
    pub win_rate_ci_method: CiMethod,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_samples_per_condition: 10,
            stability_threshold_sem: 0.1,
            investigation_threshold_sem: 0.14,
            investigation_increment: 10,
            debounce_window_ms: 500,
            confidence_level: 0.95,
            alpha: 0.05,
            outlier_threshold_sd: 2.0,
            contested_top_n: 5,
            small_sample_threshold: 10,
            bootstrap_rounds: 1000,
            max_possible_variance: 4.0,
            win_rate_ci_method: CiMethod::Wilson,
        }
    }
}

impl EngineConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    /// Reject settings under which the classifier or the statistics are
    /// undefined.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.target_samples_per_condition < 2 {
            return Err(CoreError::Config(format!(
                "target_samples_per_condition must be >= 2 (SEM needs two samples), got {}",
                self.target_samples_per_condition
            )));
        }
        if !(self.stability_threshold_sem > 0.0
            && self.stability_threshold_sem < self.investigation_threshold_sem)
        {
            return Err(CoreError::Config(format!(
                "need 0 < stability_threshold_sem ({}) < investigation_threshold_sem ({})",
                self.stability_threshold_sem, self.investigation_threshold_sem
            )));
        }
        if self.investigation_increment == 0 {
            return Err(CoreError::Config(
                "investigation_increment must be >= 1".to_string(),
            ));
        }
        for (name, value) in [
            ("confidence_level", self.confidence_level),
            ("alpha", self.alpha),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(CoreError::Config(format!(
                    "{name} must be in (0, 1), got {value}"
                )));
            }
        }
        if self.bootstrap_rounds == 0 {
            return Err(CoreError::Config("bootstrap_rounds must be >= 1".to_string()));
        }
        if !(self.max_possible_variance > 0.0) {
            return Err(CoreError::Config(
                "max_possible_variance must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a JSON config file.
    pub fn load_from_path(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read {}: {e}", path.display())))?;
        let cfg = serde_json::from_str::<EngineConfig>(&raw)
            .map_err(|e| CoreError::Config(format!("failed to parse config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.target_samples_per_condition, 10);
        assert_eq!(cfg.investigation_increment, 10);
        assert!((cfg.stability_threshold_sem - 0.1).abs() < f64::EPSILON);
        assert!((cfg.investigation_threshold_sem - 0.14).abs() < f64::EPSILON);
        assert!((cfg.confidence_level - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let cfg = EngineConfig {
            stability_threshold_sem: 0.2,
            investigation_threshold_sem: 0.1,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_target_below_two() {
        let cfg = EngineConfig {
            target_samples_per_condition: 1,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"target_samples_per_condition": 20, "debounce_window_ms": 50}}"#)
            .unwrap();
        let cfg = EngineConfig::load_from_path(file.path()).unwrap();
        assert_eq!(cfg.target_samples_per_condition, 20);
        assert_eq!(cfg.debounce_window(), Duration::from_millis(50));
        assert_eq!(cfg.investigation_increment, 10);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            EngineConfig::load_from_path(file.path()),
            Err(CoreError::Config(_))
        ));
    }
}
