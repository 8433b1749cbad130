//! Error taxonomy for the analysis engine.

use valuerank_stats::StatsError;

/// Errors surfaced by grid building, planning, aggregation and recompute
/// coordination.
///
/// `Clone` because one computation's outcome is delivered to every trigger
/// it covers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("insufficient data: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("invalid statistical input: {0}")]
    InvalidInput(String),
    #[error("malformed dimension data for scenario {scenario_id}: {reason}")]
    MalformedDimensionData { scenario_id: String, reason: String },
    /// The per-key state machine was found in a phase its own transitions
    /// cannot produce. Never retried.
    #[error("recompute conflict on {key}: expected {expected}, found {found}")]
    RecomputeConflict {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    /// The job panicked or was cancelled before producing a result. The key
    /// is released; a later trigger starts a fresh computation.
    #[error("recompute of {key} aborted: {reason}")]
    RecomputeAborted { key: String, reason: String },
    #[error("failed to read outcomes for {key}: {message}")]
    AggregationIo { key: String, message: String },
    #[error("invalid budget: {0}")]
    InvalidBudget(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Whether the queue transport may retry the failed item.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::AggregationIo { .. })
    }
}

impl From<StatsError> for CoreError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::InsufficientData { needed, got } => {
                CoreError::InsufficientData { needed, got }
            }
            StatsError::InvalidInput(msg) => CoreError::InvalidInput(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_is_retryable() {
        let io = CoreError::AggregationIo {
            key: "run:r1".into(),
            message: "connection reset".into(),
        };
        assert!(io.is_retryable());
        let conflict = CoreError::RecomputeConflict {
            key: "run:r1".into(),
            expected: "scheduled",
            found: "idle",
        };
        assert!(!conflict.is_retryable());
        let aborted = CoreError::RecomputeAborted {
            key: "run:r1".into(),
            reason: "panicked: boom".into(),
        };
        assert!(!aborted.is_retryable());
    }

    #[test]
    fn test_from_stats_error() {
        let err: CoreError = StatsError::InsufficientData { needed: 2, got: 0 }.into();
        assert_eq!(err, CoreError::InsufficientData { needed: 2, got: 0 });
        assert!(err.to_string().contains("need 2"));
    }
}
