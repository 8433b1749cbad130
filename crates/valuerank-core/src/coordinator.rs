//! Debounced, single-flight recomputation per [`RecomputeKey`].
//!
//! Each key moves through an explicit state machine:
//!
//! ```text
//! IDLE --trigger--> SCHEDULED --debounce expires--> RUNNING --done--> IDLE
//!                      ^  trigger: collapsed            |
//!                      |                                | trigger: rerun = true
//!                      +------------ done, rerun -------+
//! ```
//!
//! Transitions happen under one mutex as compare-and-set steps, so at most
//! one computation runs per key while different keys proceed in parallel.
//! Every trigger gets a [`Ticket`] that resolves with the result of the
//! computation covering it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{Notify, oneshot};
use uuid::Uuid;

use crate::analysis::{AnalysisAggregator, input_hash, recompute_cache_key};
use crate::error::CoreError;
use crate::key::{RecomputeEvent, RecomputeKey};
use crate::store::{AnalysisStore, OutcomeSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scheduled,
    Running { rerun: bool },
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Scheduled => "scheduled",
            Phase::Running { .. } => "running",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Computed { input_hash: String, superseded: bool },
    /// Inputs matched the last completed document; nothing was recomputed.
    Unchanged { input_hash: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub key: RecomputeKey,
    pub invocation_id: Uuid,
    pub outcome: CompletionOutcome,
}

/// The work performed once per RUNNING phase.
pub trait RecomputeJob: Send + Sync + 'static {
    fn run(
        &self,
        key: &RecomputeKey,
        invocation_id: Uuid,
    ) -> impl Future<Output = Result<CompletionOutcome, CoreError>> + Send;

    /// Called on IDLE -> SCHEDULED.
    fn scheduled(&self, _key: &RecomputeKey) {}

    /// Called when `run` panicked or was cancelled instead of returning.
    fn aborted(&self, _key: &RecomputeKey, _err: &CoreError) {}
}

type Reply = Result<Completion, CoreError>;

/// Resolves with the result of the computation that covered a trigger.
#[derive(Debug)]
pub struct Ticket {
    key: RecomputeKey,
    rx: oneshot::Receiver<Reply>,
}

impl Ticket {
    pub fn key(&self) -> &RecomputeKey {
        &self.key
    }

    pub async fn wait(self) -> Result<Completion, CoreError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(CoreError::RecomputeConflict {
                key: self.key.to_string(),
                expected: "running",
                found: "abandoned",
            })
        })
    }
}

#[derive(Debug)]
struct Slot {
    phase: Phase,
    waiters: Vec<oneshot::Sender<Reply>>,
}

struct Inner<J> {
    job: J,
    debounce: Duration,
    slots: Mutex<HashMap<RecomputeKey, Slot>>,
    idle: Notify,
    invocations: AtomicUsize,
}

impl<J> Inner<J> {
    fn slots(&self) -> MutexGuard<'_, HashMap<RecomputeKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// SCHEDULED -> RUNNING, handing back the triggers this run covers.
    fn start_running(&self, key: &RecomputeKey) -> Result<Vec<oneshot::Sender<Reply>>, CoreError> {
        let mut slots = self.slots();
        match slots.get(key).map(|s| s.phase) {
            Some(Phase::Scheduled) => Ok(slots
                .get_mut(key)
                .map(|slot| {
                    slot.phase = Phase::Running { rerun: false };
                    std::mem::take(&mut slot.waiters)
                })
                .unwrap_or_default()),
            other => {
                let found = other.map_or("idle", Phase::as_str);
                Err(self.abandon(&mut slots, key, "scheduled", found))
            }
        }
    }

    /// RUNNING -> SCHEDULED (returns `true`) or RUNNING -> IDLE.
    fn finish_running(&self, key: &RecomputeKey) -> Result<bool, CoreError> {
        let mut slots = self.slots();
        match slots.get(key).map(|s| s.phase) {
            Some(Phase::Running { rerun: true }) => {
                if let Some(slot) = slots.get_mut(key) {
                    slot.phase = Phase::Scheduled;
                }
                Ok(true)
            }
            Some(Phase::Running { rerun: false }) => {
                slots.remove(key);
                Ok(false)
            }
            other => {
                let found = other.map_or("idle", Phase::as_str);
                Err(self.abandon(&mut slots, key, "running", found))
            }
        }
    }

    /// Drop a slot found in an impossible phase, failing everyone waiting on it.
    fn abandon(
        &self,
        slots: &mut HashMap<RecomputeKey, Slot>,
        key: &RecomputeKey,
        expected: &'static str,
        found: &'static str,
    ) -> CoreError {
        let err = CoreError::RecomputeConflict {
            key: key.to_string(),
            expected,
            found,
        };
        if let Some(slot) = slots.remove(key) {
            for w in slot.waiters {
                let _ = w.send(Err(err.clone()));
            }
        }
        err
    }
}

/// Per-key recompute state machine driving a [`RecomputeJob`].
///
/// Must be used from within a Tokio runtime.
pub struct RecomputeCoordinator<J> {
    inner: Arc<Inner<J>>,
}

impl<J> Clone for RecomputeCoordinator<J> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J: RecomputeJob> RecomputeCoordinator<J> {
    pub fn new(job: J, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                job,
                debounce,
                slots: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                invocations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn job(&self) -> &J {
        &self.inner.job
    }

    pub fn trigger(&self, event: RecomputeEvent) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let key = event.key;
        let spawn_driver = {
            let mut slots = self.inner.slots();
            match slots.get_mut(&key) {
                Some(slot) => match slot.phase {
                    Phase::Scheduled => {
                        debug!("{key}: {:?} collapsed into scheduled recompute", event.reason);
                        slot.waiters.push(tx);
                        false
                    }
                    Phase::Running { .. } => {
                        debug!("{key}: {:?} arrived while running; follow-up queued", event.reason);
                        slot.phase = Phase::Running { rerun: true };
                        slot.waiters.push(tx);
                        false
                    }
                    Phase::Idle => {
                        slot.phase = Phase::Scheduled;
                        slot.waiters.push(tx);
                        true
                    }
                },
                None => {
                    slots.insert(
                        key.clone(),
                        Slot {
                            phase: Phase::Scheduled,
                            waiters: vec![tx],
                        },
                    );
                    true
                }
            }
        };

        if spawn_driver {
            debug!("{key}: scheduled ({:?})", event.reason);
            self.inner.job.scheduled(&key);
            tokio::spawn(drive(Arc::clone(&self.inner), key.clone()));
        }
        Ticket { key, rx }
    }

    /// Trigger every event, wait for all of them, and log each failure.
    pub async fn handle_batch(
        &self,
        events: impl IntoIterator<Item = RecomputeEvent>,
    ) -> BatchOutcome {
        let tickets: Vec<(RecomputeEvent, Ticket)> = events
            .into_iter()
            .map(|event| {
                let ticket = self.trigger(event.clone());
                (event, ticket)
            })
            .collect();

        let mut outcome = BatchOutcome::default();
        for (event, ticket) in tickets {
            match ticket.wait().await {
                Ok(completion) => outcome.completed.push(completion),
                Err(err) => {
                    error!("recompute for {} ({:?}) failed: {err}", event.key, event.reason);
                    outcome.failures.push((event, err));
                }
            }
        }
        outcome
    }

    pub fn phase(&self, key: &RecomputeKey) -> Phase {
        self.inner
            .slots()
            .get(key)
            .map_or(Phase::Idle, |slot| slot.phase)
    }

    /// Resolve once `key` has no scheduled or running computation.
    pub async fn wait_idle(&self, key: &RecomputeKey) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.phase(key) == Phase::Idle {
                return;
            }
            notified.await;
        }
    }

    /// Total job invocations across all keys.
    pub fn invocations(&self) -> usize {
        self.inner.invocations.load(Ordering::SeqCst)
    }
}

async fn drive<J: RecomputeJob>(inner: Arc<Inner<J>>, key: RecomputeKey) {
    loop {
        tokio::time::sleep(inner.debounce).await;

        let waiters = match inner.start_running(&key) {
            Ok(waiters) => waiters,
            Err(err) => {
                error!("{err}");
                break;
            }
        };

        let invocation_id = Uuid::new_v4();
        inner.invocations.fetch_add(1, Ordering::SeqCst);
        info!(
            "{key}: recompute {invocation_id} started for {} trigger(s)",
            waiters.len()
        );
        let result = run_isolated(&inner, &key, invocation_id)
            .await
            .map(|outcome| Completion {
                key: key.clone(),
                invocation_id,
                outcome,
            });
        match &result {
            Ok(c) => info!("{key}: recompute {invocation_id} finished: {:?}", c.outcome),
            Err(err) => error!("{key}: recompute {invocation_id} failed: {err}"),
        }
        for w in waiters {
            let _ = w.send(result.clone());
        }

        match inner.finish_running(&key) {
            Ok(true) => debug!("{key}: follow-up recompute scheduled"),
            Ok(false) => break,
            Err(err) => {
                error!("{err}");
                break;
            }
        }
    }
    inner.idle.notify_waiters();
}

/// Run the job on its own task so a panic fails this invocation instead of
/// killing the driver and leaving the key in RUNNING.
async fn run_isolated<J: RecomputeJob>(
    inner: &Arc<Inner<J>>,
    key: &RecomputeKey,
    invocation_id: Uuid,
) -> Result<CompletionOutcome, CoreError> {
    let task = {
        let inner = Arc::clone(inner);
        let key = key.clone();
        tokio::spawn(async move { inner.job.run(&key, invocation_id).await })
    };
    match task.await {
        Ok(result) => result,
        Err(join) => {
            let reason = if join.is_panic() {
                format!("panicked: {}", panic_message(join.into_panic()))
            } else {
                "cancelled".to_string()
            };
            let err = CoreError::RecomputeAborted {
                key: key.to_string(),
                reason,
            };
            inner.job.aborted(key, &err);
            Err(err)
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "non-string panic payload".to_string(), |s| s.to_string()),
    }
}

/// Results of [`RecomputeCoordinator::handle_batch`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub completed: Vec<Completion>,
    pub failures: Vec<(RecomputeEvent, CoreError)>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Re-raise the first failure so the transport can retry the batch.
    pub fn into_result(self) -> Result<Vec<Completion>, CoreError> {
        match self.failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(self.completed),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis job
// ---------------------------------------------------------------------------

/// Snapshot, hash, skip if unchanged, compute, persist.
pub struct AnalysisJob<S> {
    source: Arc<S>,
    store: Arc<AnalysisStore>,
    aggregator: AnalysisAggregator,
}

impl<S: OutcomeSource> AnalysisJob<S> {
    pub fn new(source: Arc<S>, store: Arc<AnalysisStore>, aggregator: AnalysisAggregator) -> Self {
        Self {
            source,
            store,
            aggregator,
        }
    }

    pub fn store(&self) -> &Arc<AnalysisStore> {
        &self.store
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }
}

impl<S: OutcomeSource + 'static> RecomputeJob for AnalysisJob<S> {
    async fn run(
        &self,
        key: &RecomputeKey,
        invocation_id: Uuid,
    ) -> Result<CompletionOutcome, CoreError> {
        self.store.begin_computing(key);
        let snapshot = match self.source.snapshot(key) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.store.fail(key, err.clone());
                return Err(err);
            }
        };

        let hash = input_hash(&snapshot.outcomes);
        let cache_key = recompute_cache_key(&snapshot.outcomes, &snapshot.dimensions);
        if self.store.last_cache_key(key).as_deref() == Some(cache_key.as_str()) {
            debug!("{key}: inputs unchanged ({invocation_id}), keeping current analysis");
            self.store.revert_completed(key);
            return Ok(CompletionOutcome::Unchanged { input_hash: hash });
        }

        let aggregator = self.aggregator;
        let computed = tokio::task::spawn_blocking(move || {
            aggregator.compute(&snapshot.run_id, &snapshot.outcomes, &snapshot.dimensions)
        })
        .await;
        let document = match computed {
            Ok(document) => document,
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(join) => {
                let err = CoreError::AggregationIo {
                    key: key.to_string(),
                    message: format!("computation cancelled: {join}"),
                };
                self.store.fail(key, err.clone());
                return Err(err);
            }
        };

        let superseded = self.store.complete_with_cache_key(key, document, cache_key);
        Ok(CompletionOutcome::Computed {
            input_hash: hash,
            superseded,
        })
    }

    fn scheduled(&self, key: &RecomputeKey) {
        self.store.mark_pending(key);
    }

    fn aborted(&self, key: &RecomputeKey, err: &CoreError) {
        self.store.fail(key, err.clone());
    }
}
