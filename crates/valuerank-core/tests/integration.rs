//! Integration tests for valuerank-core.
//!
//! These tests drive the full pipeline:
//! run file → condition grid → stability → trial plan, and
//! triggers → coordinator → analysis job → document store.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use valuerank_core::{
    AnalysisAggregator, AnalysisJob, AnalysisStatus, AnalysisStore, CompletionOutcome,
    ConditionGrid, CoreError, DecisionValue, DimensionIndex, EngineConfig, Freshness,
    MemoryOutcomeSource, OutcomeRecord, RecomputeCoordinator, RecomputeEvent, RecomputeKey,
    RunInput, RunSnapshot, StabilityClassifier, StabilityStatus, StabilitySummary, TrialPlanner,
    TriggerReason, ValueStatus,
};

fn run_file() -> tempfile::NamedTempFile {
    let mut outcomes = Vec::new();
    for i in 0..12 {
        let noisy = if i % 2 == 0 { 1 } else { 5 };
        outcomes.push(json!({
            "scenario_id": "s1", "model_id": "steady", "decision_value": "3",
            "success": true, "created_at": format!("2026-01-01T00:00:{i:02}Z"), "sample_index": i
        }));
        outcomes.push(json!({
            "scenario_id": "s2", "model_id": "steady", "decision_value": noisy,
            "success": true, "created_at": format!("2026-01-01T00:01:{i:02}Z"), "sample_index": i
        }));
    }
    outcomes.push(json!({
        "scenario_id": "s3", "model_id": "steady", "decision_value": "refuse",
        "success": true, "created_at": "2026-01-01T00:02:00Z"
    }));
    let run = json!({
        "run_id": "run-42",
        "outcomes": outcomes,
        "scenario_dimensions": {
            "s1": {"stakes": "high", "certainty": "low"},
            "s2": {"stakes": "low", "certainty": "low"},
            "s3": {"stakes": "low"}
        }
    });
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{run}").unwrap();
    file
}

#[test]
fn run_file_to_trial_plan() {
    let file = run_file();
    let input = RunInput::load_from_path(file.path()).unwrap();
    assert_eq!(input.outcomes.len(), 25);

    let dims = DimensionIndex::from_raw(&input.scenario_dimensions);
    let grid = ConditionGrid::build(&input.outcomes, &dims, "stakes", "certainty");
    assert_eq!(grid.conditions.len(), 3);

    let models = vec!["steady".to_string(), "absent".to_string()];
    let verdicts = StabilityClassifier::default().classify_grid(&grid, &models);
    let summary = StabilitySummary::from_verdicts(&verdicts);
    // steady: high|low stable, low|low chaotic, low|N/A only categorical.
    assert_eq!(summary.stable, 1);
    assert_eq!(summary.chaotic, 1);
    assert_eq!(summary.insufficient_data, 4);

    let plan = TrialPlanner::default().plan(&grid, &models, None).unwrap();
    let steady = &plan.models[0];
    let na = steady
        .conditions
        .iter()
        .find(|c| c.condition_key.to_string() == "low|N/A")
        .unwrap();
    assert_eq!(na.status, StabilityStatus::InsufficientData);
    assert_eq!(na.planned_samples, 10);
    assert_eq!(steady.total_jobs_for_model, 10);
    assert_eq!(plan.models[1].total_jobs_for_model, 30);
    assert_eq!(plan.total_jobs, 40);
}

#[test]
fn missing_run_file_is_io_error() {
    let err = RunInput::load_from_path("/nonexistent/run.json".as_ref()).unwrap_err();
    assert!(matches!(err, CoreError::AggregationIo { .. }));
}

fn outcomes(values: &[(&str, &str, f64)]) -> Vec<OutcomeRecord> {
    values
        .iter()
        .enumerate()
        .map(|(i, (scenario, model, v))| {
            OutcomeRecord::new(*scenario, *model, DecisionValue::Numeric(*v), format!("t{i}"))
        })
        .collect()
}

fn analysis_coordinator() -> (
    RecomputeCoordinator<AnalysisJob<MemoryOutcomeSource>>,
    Arc<MemoryOutcomeSource>,
    Arc<AnalysisStore>,
) {
    let config = EngineConfig::default();
    let source = Arc::new(MemoryOutcomeSource::new());
    let store = Arc::new(AnalysisStore::new());
    let job = AnalysisJob::new(
        Arc::clone(&source),
        Arc::clone(&store),
        AnalysisAggregator::new(config),
    );
    (
        RecomputeCoordinator::new(job, config.debounce_window()),
        source,
        store,
    )
}

fn probe(key: &RecomputeKey) -> RecomputeEvent {
    RecomputeEvent::new(key.clone(), TriggerReason::ProbeCompleted)
}

#[tokio::test(start_paused = true)]
async fn probe_burst_computes_once_and_persists() {
    let (coord, source, store) = analysis_coordinator();
    let key = RecomputeKey::run("r1");
    source.append(
        &key,
        outcomes(&[("s1", "a", 1.0), ("s2", "a", 3.0), ("s1", "b", 2.0), ("s2", "b", 4.0)]),
    );

    let batch = coord.handle_batch((0..50).map(|_| probe(&key))).await;
    let completed = batch.into_result().unwrap();
    assert_eq!(completed.len(), 50);
    assert_eq!(coord.invocations(), 1);
    assert_eq!(source.reads(), 1);
    assert_eq!(store.status(&key), Some(AnalysisStatus::Completed));

    let doc = store.current(&key).unwrap();
    assert_eq!(doc.run_id, "r1");
    assert_eq!(doc.per_model.len(), 2);
    assert!(doc.model_agreement.is_some());
}

#[tokio::test(start_paused = true)]
async fn unchanged_inputs_skip_recompute() {
    let (coord, source, store) = analysis_coordinator();
    let key = RecomputeKey::run("r1");
    source.append(&key, outcomes(&[("s1", "a", 1.0), ("s2", "a", 2.0)]));

    coord.trigger(probe(&key)).wait().await.unwrap();
    let first = store.current(&key).unwrap();

    let again = coord.trigger(probe(&key)).wait().await.unwrap();
    assert!(matches!(again.outcome, CompletionOutcome::Unchanged { .. }));
    assert_eq!(store.history(&key).len(), 1);
    assert_eq!(store.current(&key).unwrap(), first);

    source.append(&key, outcomes(&[("s3", "a", 5.0)]));
    let changed = coord.trigger(probe(&key)).wait().await.unwrap();
    assert!(matches!(
        changed.outcome,
        CompletionOutcome::Computed { superseded: true, .. }
    ));
    let history = store.history(&key);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].freshness, Freshness::Superseded);
    assert_ne!(history[0].document.input_hash, history[1].document.input_hash);
}

fn scored_run(status: ValueStatus, stakes: &str) -> RunSnapshot {
    let outcomes = outcomes(&[("s1", "a", 1.0), ("s2", "a", 2.0), ("s3", "a", 4.0), ("s4", "a", 5.0)])
        .into_iter()
        .map(|o| o.with_value("Safety", status))
        .collect();
    let mut dimensions = DimensionIndex::new();
    for (scenario, level) in [("s1", stakes), ("s2", stakes), ("s3", "low"), ("s4", "low")] {
        dimensions.insert(scenario, [("stakes".to_string(), level.to_string())].into());
    }
    RunSnapshot {
        run_id: "r1".to_string(),
        outcomes,
        dimensions,
    }
}

#[tokio::test(start_paused = true)]
async fn rescored_values_and_dimensions_force_recompute() {
    let (coord, source, store) = analysis_coordinator();
    let key = RecomputeKey::run("r1");
    source.insert(key.clone(), scored_run(ValueStatus::Prioritized, "high"));
    coord.trigger(probe(&key)).wait().await.unwrap();
    let win_rate = |store: &AnalysisStore| {
        store.current(&key).unwrap().per_model["a"].values["Safety"].win_rate
    };
    assert_eq!(win_rate(&store), Some(1.0));

    // Same decisions, so the document hash is unchanged, but the summaries
    // now deprioritize the value.
    source.insert(key.clone(), scored_run(ValueStatus::Deprioritized, "high"));
    let rescored = coord
        .trigger(RecomputeEvent::new(key.clone(), TriggerReason::TranscriptSummarized))
        .wait()
        .await
        .unwrap();
    assert!(matches!(rescored.outcome, CompletionOutcome::Computed { .. }));
    assert_eq!(win_rate(&store), Some(0.0));

    source.insert(key.clone(), scored_run(ValueStatus::Deprioritized, "low"));
    let relabelled = coord.trigger(probe(&key)).wait().await.unwrap();
    assert!(matches!(relabelled.outcome, CompletionOutcome::Computed { .. }));
    let doc = store.current(&key).unwrap();
    assert!(doc.dimension_analysis.dimensions.is_empty());
    assert!(doc.dimension_analysis.untestable.contains_key("stakes"));

    let again = coord.trigger(probe(&key)).wait().await.unwrap();
    assert!(matches!(again.outcome, CompletionOutcome::Unchanged { .. }));
    assert_eq!(coord.invocations(), 4);
}

#[tokio::test(start_paused = true)]
async fn failed_recompute_keeps_previous_document() {
    let (coord, source, store) = analysis_coordinator();
    let key = RecomputeKey::run("r1");
    source.append(&key, outcomes(&[("s1", "a", 1.0), ("s2", "a", 2.0)]));
    coord.trigger(probe(&key)).wait().await.unwrap();
    let before = store.current(&key).unwrap();

    source.append(&key, outcomes(&[("s3", "a", 4.0)]));
    source.fail_next(&key, "replica lag");
    let err = coord.trigger(probe(&key)).wait().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.status(&key), Some(AnalysisStatus::Completed));
    assert_eq!(store.current(&key).unwrap(), before);
    assert!(store.last_error(&key).is_some());

    // The transport retries; the next attempt sees the new outcomes.
    coord.trigger(probe(&key)).wait().await.unwrap();
    assert_eq!(store.current(&key).unwrap().outcome_count, 3);
}

#[tokio::test(start_paused = true)]
async fn first_failure_marks_document_failed() {
    let (coord, _source, store) = analysis_coordinator();
    let key = RecomputeKey::definition("def-1", None, 3);
    let batch = coord.handle_batch([probe(&key)]).await;
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(store.status(&key), Some(AnalysisStatus::Failed));
    assert!(store.current(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn triggers_within_debounce_share_one_snapshot() {
    let (coord, source, store) = analysis_coordinator();
    let key = RecomputeKey::run("r1");
    source.append(&key, outcomes(&[("s1", "a", 1.0), ("s2", "a", 2.0)]));

    let first = coord.trigger(probe(&key));
    tokio::time::sleep(Duration::from_millis(100)).await;
    source.append(&key, outcomes(&[("s3", "a", 3.0)]));
    let second = coord.trigger(probe(&key));

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    coord.wait_idle(&key).await;
    assert_eq!(coord.invocations(), 1);
    assert_eq!(store.current(&key).unwrap().outcome_count, 3);
}
