use std::sync::Arc;
use std::time::{Duration, Instant};

use valuerank_core::{
    AnalysisAggregator, AnalysisJob, AnalysisStore, BatchOutcome, CompletionOutcome,
    MemoryOutcomeSource, RecomputeCoordinator, RecomputeEvent, RecomputeKey, TriggerReason,
};

const REASONS: [TriggerReason; 3] = [
    TriggerReason::ProbeCompleted,
    TriggerReason::TranscriptSummarized,
    TriggerReason::ProbeCompleted,
];

pub fn run(input_path: &str, triggers: usize, debounce_ms: Option<u64>, config_path: Option<&str>) {
    let config = super::load_config(config_path);
    let input = super::load_input(input_path);
    let debounce = debounce_ms.map_or_else(|| config.debounce_window(), Duration::from_millis);

    let key = RecomputeKey::run(input.run_id.clone());
    let source = Arc::new(MemoryOutcomeSource::new());
    source.insert_input(key.clone(), &input);
    let store = Arc::new(AnalysisStore::new());
    let job = AnalysisJob::new(
        Arc::clone(&source),
        Arc::clone(&store),
        AnalysisAggregator::new(config),
    );

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| super::fail(e));
    rt.block_on(async {
        let coord = RecomputeCoordinator::new(job, debounce);
        println!(
            "Replaying bursts of {triggers} trigger(s) for {key} (debounce {} ms)",
            debounce.as_millis()
        );

        for (round, label) in ["initial burst", "repeat burst (inputs unchanged)"]
            .iter()
            .enumerate()
        {
            let before = coord.invocations();
            let started = Instant::now();
            let events = (0..triggers).map(|i| {
                let reason = if i == 0 && round == 0 {
                    TriggerReason::RunStarted
                } else {
                    REASONS[i % REASONS.len()]
                };
                RecomputeEvent::new(key.clone(), reason)
            });
            let outcome = coord.handle_batch(events).await;
            report(label, &outcome, coord.invocations() - before, started.elapsed());
            if let Err(e) = outcome.into_result() {
                super::fail(e);
            }
        }
        coord.wait_idle(&key).await;
    });

    let status = store
        .status(&key)
        .map_or("none", |s| s.as_str());
    println!("\n  Document status: {status}");
    println!("  Outcome snapshots read: {}", source.reads());
    if let Some(doc) = store.current(&key) {
        println!(
            "  Current analysis: {} models, hash {}",
            doc.per_model.len(),
            &doc.input_hash[..12]
        );
    }
}

fn report(label: &str, outcome: &BatchOutcome, invocations: usize, elapsed: Duration) {
    let computed = outcome
        .completed
        .iter()
        .filter(|c| matches!(c.outcome, CompletionOutcome::Computed { .. }))
        .count();
    println!(
        "\n  {label}: {} completed, {} failed, {invocations} computation(s), {computed} ticket(s) saw a fresh document ({:.0} ms)",
        outcome.completed.len(),
        outcome.failures.len(),
        elapsed.as_secs_f64() * 1000.0
    );
}
