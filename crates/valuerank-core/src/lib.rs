//! # valuerank-core
//!
//! **How consistently do models decide, and does it hold up statistically?**
//!
//! `valuerank-core` turns per-probe model decisions into per-condition
//! statistics, decides how many more samples each condition needs, and keeps
//! run analyses current while probes keep landing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use valuerank_core::{ConditionGrid, EngineConfig, RunInput, StabilityClassifier, TrialPlanner};
//!
//! let input = RunInput::load_from_path("run.json".as_ref()).unwrap();
//! let dims = valuerank_core::DimensionIndex::from_raw(&input.scenario_dimensions);
//! let grid = ConditionGrid::build(&input.outcomes, &dims, "stakes", "certainty");
//!
//! let config = EngineConfig::default();
//! let plan = TrialPlanner::new(&config)
//!     .plan(&grid, &input.model_ids(), None)
//!     .unwrap();
//! println!("{} more jobs needed", plan.total_jobs);
//! ```
//!
//! ## Architecture
//!
//! Outcomes → ConditionGrid → StabilityClassifier → TrialPlanner
//!
//! Outcomes → AnalysisAggregator → AnalysisStore, driven by the
//! RecomputeCoordinator, which debounces trigger bursts and keeps one
//! computation in flight per key.
//!
//! Statistical primitives live in `valuerank-stats`; this crate never
//! computes a variance or a p-value by hand.

pub mod analysis;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod grid;
pub mod key;
pub mod outcome;
pub mod planner;
pub mod stability;
pub mod store;

pub use analysis::{
    AnalysisAggregator, AnalysisDocument, AnalysisStatus, AnalysisWarning, CODE_VERSION,
    ContestedScenario, DimensionAnalysis, DimensionEffect, MethodsUsed, ModelStats,
    ModelVariance, ValueStats, VarianceAnalysis, WarningCode, input_hash, recompute_cache_key,
};
pub use config::EngineConfig;
pub use coordinator::{
    AnalysisJob, BatchOutcome, Completion, CompletionOutcome, Phase, RecomputeCoordinator,
    RecomputeJob, Ticket,
};
pub use error::CoreError;
pub use grid::{
    Cell, ConditionGrid, ConditionKey, DimensionIndex, DimensionValues, NA_LEVEL,
    normalize_level, parse_dimensions,
};
pub use key::{RecomputeEvent, RecomputeKey, TriggerReason};
pub use outcome::{DecisionValue, OutcomeRecord, RunInput, ValueStatus};
pub use planner::{Budget, ConditionPlan, ModelPlan, SkippedDemand, TrialPlan, TrialPlanner};
pub use stability::{
    CellVerdict, StabilityClassifier, StabilityStatus, StabilitySummary, StabilityVerdict,
};
pub use store::{
    AnalysisStore, DEFAULT_HISTORY_LIMIT, Freshness, MemoryOutcomeSource, OutcomeSource,
    RunSnapshot, StoredDocument,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
