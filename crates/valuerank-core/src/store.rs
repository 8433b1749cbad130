//! Outcome sources and the analysis document store.
//!
//! Lifecycle per key: `PENDING -> COMPUTING -> COMPLETED | FAILED`. A failed
//! recompute never hides a previously completed document; the old document
//! stays current and the error is kept next to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisDocument, AnalysisStatus};
use crate::error::CoreError;
use crate::grid::DimensionIndex;
use crate::key::RecomputeKey;
use crate::outcome::{OutcomeRecord, RunInput};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Read-only view of a key's outcomes, taken once per computation.
#[derive(Debug, Clone, Default)]
pub struct RunSnapshot {
    pub run_id: String,
    pub outcomes: Vec<OutcomeRecord>,
    pub dimensions: DimensionIndex,
}

impl RunSnapshot {
    pub fn from_input(input: &RunInput) -> Self {
        Self {
            run_id: input.run_id.clone(),
            outcomes: input.outcomes.clone(),
            dimensions: DimensionIndex::from_raw(&input.scenario_dimensions),
        }
    }
}

/// Where outcomes come from. Implementations must hand out a consistent
/// snapshot; the aggregator never reads the same key twice per invocation.
pub trait OutcomeSource: Send + Sync {
    fn snapshot(&self, key: &RecomputeKey) -> Result<RunSnapshot, CoreError>;
}

/// In-memory source with one-shot failure injection.
#[derive(Debug, Default)]
pub struct MemoryOutcomeSource {
    runs: Mutex<HashMap<RecomputeKey, RunSnapshot>>,
    failures: Mutex<HashMap<RecomputeKey, String>>,
    reads: AtomicUsize,
}

impl MemoryOutcomeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: RecomputeKey, snapshot: RunSnapshot) {
        lock(&self.runs).insert(key, snapshot);
    }

    pub fn insert_input(&self, key: RecomputeKey, input: &RunInput) {
        self.insert(key, RunSnapshot::from_input(input));
    }

    /// Append outcomes, creating the key if needed.
    pub fn append(&self, key: &RecomputeKey, outcomes: impl IntoIterator<Item = OutcomeRecord>) {
        let mut runs = lock(&self.runs);
        let snapshot = runs.entry(key.clone()).or_insert_with(|| RunSnapshot {
            run_id: run_id_for(key),
            ..RunSnapshot::default()
        });
        snapshot.outcomes.extend(outcomes);
    }

    /// Make the next snapshot of `key` fail with an I/O error.
    pub fn fail_next(&self, key: &RecomputeKey, message: impl Into<String>) {
        lock(&self.failures).insert(key.clone(), message.into());
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl OutcomeSource for MemoryOutcomeSource {
    fn snapshot(&self, key: &RecomputeKey) -> Result<RunSnapshot, CoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = lock(&self.failures).remove(key) {
            return Err(CoreError::AggregationIo {
                key: key.to_string(),
                message,
            });
        }
        lock(&self.runs)
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::AggregationIo {
                key: key.to_string(),
                message: "no outcomes recorded for key".to_string(),
            })
    }
}

fn run_id_for(key: &RecomputeKey) -> String {
    match key {
        RecomputeKey::Run { run_id } => run_id.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    Current,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub freshness: Freshness,
    pub document: AnalysisDocument,
}

/// Documents kept per key, the current one included.
pub const DEFAULT_HISTORY_LIMIT: usize = 8;

#[derive(Debug)]
struct Entry {
    status: AnalysisStatus,
    /// Oldest first; the last document is current.
    history: Vec<AnalysisDocument>,
    /// Skip key the current document was computed under, if any.
    cache_key: Option<String>,
    last_error: Option<CoreError>,
}

impl Entry {
    fn new() -> Self {
        Self {
            status: AnalysisStatus::Pending,
            history: Vec::new(),
            cache_key: None,
            last_error: None,
        }
    }
}

#[derive(Debug)]
pub struct AnalysisStore {
    entries: Mutex<HashMap<RecomputeKey, Entry>>,
    history_limit: usize,
}

impl Default for AnalysisStore {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl AnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` documents per key; the oldest superseded ones
    /// are dropped first. A limit of zero is treated as one.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            history_limit: limit.max(1),
        }
    }

    pub fn mark_pending(&self, key: &RecomputeKey) {
        let mut entries = lock(&self.entries);
        entries.entry(key.clone()).or_insert_with(Entry::new).status = AnalysisStatus::Pending;
    }

    pub fn begin_computing(&self, key: &RecomputeKey) {
        let mut entries = lock(&self.entries);
        entries.entry(key.clone()).or_insert_with(Entry::new).status = AnalysisStatus::Computing;
    }

    /// Store a finished document. Returns `true` when it superseded a
    /// current document with a different input hash.
    pub fn complete(&self, key: &RecomputeKey, document: AnalysisDocument) -> bool {
        self.store_completed(key, document, None)
    }

    /// [`AnalysisStore::complete`], remembering the skip key the document was
    /// computed under.
    pub fn complete_with_cache_key(
        &self,
        key: &RecomputeKey,
        document: AnalysisDocument,
        cache_key: String,
    ) -> bool {
        self.store_completed(key, document, Some(cache_key))
    }

    fn store_completed(
        &self,
        key: &RecomputeKey,
        document: AnalysisDocument,
        cache_key: Option<String>,
    ) -> bool {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.status = AnalysisStatus::Completed;
        entry.cache_key = cache_key;
        entry.last_error = None;
        let superseded = match entry.history.last_mut() {
            Some(current) if current.input_hash == document.input_hash => {
                *current = document;
                false
            }
            Some(_) => {
                entry.history.push(document);
                true
            }
            None => {
                entry.history.push(document);
                false
            }
        };
        if superseded {
            debug!("analysis for {key} superseded");
        }
        let excess = entry.history.len().saturating_sub(self.history_limit);
        if excess > 0 {
            entry.history.drain(..excess);
        }
        superseded
    }

    /// The inputs did not change; go back to COMPLETED without a new document.
    pub fn revert_completed(&self, key: &RecomputeKey) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(key) {
            if !entry.history.is_empty() {
                entry.status = AnalysisStatus::Completed;
            }
        }
    }

    /// Record a failed computation and return the resulting status.
    pub fn fail(&self, key: &RecomputeKey, error: CoreError) -> AnalysisStatus {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.status = if entry.history.is_empty() {
            AnalysisStatus::Failed
        } else {
            warn!("recompute of {key} failed, keeping previous analysis: {error}");
            AnalysisStatus::Completed
        };
        entry.last_error = Some(error);
        entry.status
    }

    pub fn current(&self, key: &RecomputeKey) -> Option<AnalysisDocument> {
        lock(&self.entries)
            .get(key)
            .and_then(|e| e.history.last().cloned())
    }

    pub fn history(&self, key: &RecomputeKey) -> Vec<StoredDocument> {
        let entries = lock(&self.entries);
        let Some(entry) = entries.get(key) else {
            return Vec::new();
        };
        let last = entry.history.len().saturating_sub(1);
        entry
            .history
            .iter()
            .enumerate()
            .map(|(i, document)| StoredDocument {
                freshness: if i == last {
                    Freshness::Current
                } else {
                    Freshness::Superseded
                },
                document: document.clone(),
            })
            .collect()
    }

    pub fn status(&self, key: &RecomputeKey) -> Option<AnalysisStatus> {
        lock(&self.entries).get(key).map(|e| e.status)
    }

    pub fn last_completed_hash(&self, key: &RecomputeKey) -> Option<String> {
        lock(&self.entries)
            .get(key)
            .and_then(|e| e.history.last().map(|d| d.input_hash.clone()))
    }

    pub fn last_cache_key(&self, key: &RecomputeKey) -> Option<String> {
        lock(&self.entries).get(key).and_then(|e| e.cache_key.clone())
    }

    pub fn last_error(&self, key: &RecomputeKey) -> Option<CoreError> {
        lock(&self.entries).get(key).and_then(|e| e.last_error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisAggregator;
    use crate::outcome::DecisionValue;

    fn doc(values: &[f64]) -> AnalysisDocument {
        let outcomes: Vec<OutcomeRecord> = values
            .iter()
            .enumerate()
            .map(|(i, v)| OutcomeRecord::new(format!("s{i}"), "m", DecisionValue::Numeric(*v), "t"))
            .collect();
        AnalysisAggregator::default().compute("r1", &outcomes, &DimensionIndex::new())
    }

    fn io_error() -> CoreError {
        CoreError::AggregationIo {
            key: "run:r1".into(),
            message: "timeout".into(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let store = AnalysisStore::new();
        let key = RecomputeKey::run("r1");
        assert_eq!(store.status(&key), None);
        store.mark_pending(&key);
        assert_eq!(store.status(&key), Some(AnalysisStatus::Pending));
        store.begin_computing(&key);
        assert_eq!(store.status(&key), Some(AnalysisStatus::Computing));
        let d = doc(&[1.0, 2.0]);
        let hash = d.input_hash.clone();
        assert!(!store.complete(&key, d));
        assert_eq!(store.status(&key), Some(AnalysisStatus::Completed));
        assert_eq!(store.last_completed_hash(&key), Some(hash));
    }

    #[test]
    fn test_fail_without_prior_document() {
        let store = AnalysisStore::new();
        let key = RecomputeKey::run("r1");
        store.begin_computing(&key);
        assert_eq!(store.fail(&key, io_error()), AnalysisStatus::Failed);
        assert!(store.current(&key).is_none());
        assert_eq!(store.last_error(&key), Some(io_error()));
    }

    #[test]
    fn test_fail_keeps_completed_document_current() {
        let store = AnalysisStore::new();
        let key = RecomputeKey::run("r1");
        let d = doc(&[1.0, 2.0]);
        store.complete(&key, d.clone());
        store.begin_computing(&key);
        assert_eq!(store.fail(&key, io_error()), AnalysisStatus::Completed);
        assert_eq!(store.current(&key), Some(d));
        assert!(store.last_error(&key).is_some());
    }

    #[test]
    fn test_new_hash_supersedes() {
        let store = AnalysisStore::new();
        let key = RecomputeKey::run("r1");
        store.complete(&key, doc(&[1.0, 2.0]));
        assert!(!store.complete(&key, doc(&[1.0, 2.0])));
        assert_eq!(store.history(&key).len(), 1);
        assert!(store.complete(&key, doc(&[1.0, 2.0, 3.0])));
        let history = store.history(&key);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].freshness, Freshness::Superseded);
        assert_eq!(history[1].freshness, Freshness::Current);
        assert_eq!(history[1].document.outcome_count, 3);
    }

    #[test]
    fn test_history_is_capped() {
        let store = AnalysisStore::with_history_limit(3);
        let key = RecomputeKey::run("r1");
        for n in 1..=6usize {
            let values: Vec<f64> = (0..n).map(|i| i as f64).collect();
            store.complete(&key, doc(&values));
        }
        let history = store.history(&key);
        assert_eq!(history.len(), 3);
        let counts: Vec<usize> = history.iter().map(|h| h.document.outcome_count).collect();
        assert_eq!(counts, vec![4, 5, 6]);
        assert_eq!(history[2].freshness, Freshness::Current);
        assert_eq!(store.current(&key).unwrap().outcome_count, 6);
        assert_eq!(AnalysisStore::new().history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_cache_key_follows_current_document() {
        let store = AnalysisStore::new();
        let key = RecomputeKey::run("r1");
        store.complete_with_cache_key(&key, doc(&[1.0, 2.0]), "k1".to_string());
        assert_eq!(store.last_cache_key(&key).as_deref(), Some("k1"));
        store.complete(&key, doc(&[1.0, 2.0, 3.0]));
        assert_eq!(store.last_cache_key(&key), None);
    }

    #[test]
    fn test_memory_source_failure_is_one_shot() {
        let source = MemoryOutcomeSource::new();
        let key = RecomputeKey::run("r1");
        assert!(matches!(
            source.snapshot(&key),
            Err(CoreError::AggregationIo { .. })
        ));
        source.append(
            &key,
            [OutcomeRecord::new("s1", "m", DecisionValue::Numeric(1.0), "t")],
        );
        source.fail_next(&key, "connection reset");
        let err = source.snapshot(&key).unwrap_err();
        assert!(err.is_retryable());
        let snap = source.snapshot(&key).unwrap();
        assert_eq!(snap.run_id, "r1");
        assert_eq!(snap.outcomes.len(), 1);
        assert_eq!(source.reads(), 3);
    }
}
