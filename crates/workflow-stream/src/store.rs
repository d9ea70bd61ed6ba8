use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::accumulator::{AccumulatorState, Applied, WorkflowAccumulator};
use crate::config::StreamClientConfig;
use crate::errors::{RunFailure, StoreError};
use crate::event::StreamEvent;
use crate::ledger::{DEFAULT_HISTORY_LIMIT, RunId, RunIdGenerator, RunLedger, RunRecord, RunStatus};
use crate::observer::{SubscriptionId, WorkflowObserver, WorkflowUpdate};
use crate::request::RunMeta;
use crate::result::WorkflowResult;
use crate::step::{StepPhase, WorkflowStep};

/// Proof of ownership of the live session, returned by [`WorkflowStore::start`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    run_id: RunId,
    session_id: uuid::Uuid,
}

impl SessionToken {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
}

/// Point-in-time view of everything the UI renders.
#[derive(Clone, Debug)]
pub struct StoreSnapshot {
    pub is_generating: bool,
    pub state: AccumulatorState,
    pub streaming_step: Option<WorkflowStep>,
    pub streaming_message: String,
    /// The viewed run's result, or the live result when nothing is viewed.
    pub workflow_result: Arc<WorkflowResult>,
    pub live_result: Arc<WorkflowResult>,
    pub generation_error: Option<String>,
    pub analysis_history: Vec<Arc<RunRecord>>,
    pub viewing_history_id: Option<RunId>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub step_phases: Vec<(WorkflowStep, StepPhase)>,
}

struct LiveSession {
    token: SessionToken,
    meta: RunMeta,
    started_at: DateTime<Utc>,
}

struct StoreState {
    accumulator: WorkflowAccumulator,
    ledger: RunLedger,
    live: Option<LiveSession>,
    generation_error: Option<String>,
    last_analyzed_at: Option<DateTime<Utc>>,
}

impl StoreState {
    fn check(&self, token: &SessionToken) -> Result<&LiveSession, StoreError> {
        match &self.live {
            Some(live) if live.token == *token => Ok(live),
            _ => Err(StoreError::StaleSession),
        }
    }

    fn active_result(&self) -> Arc<WorkflowResult> {
        match self.ledger.viewed_record() {
            Some(record) => Arc::clone(&record.result),
            None => Arc::clone(self.accumulator.result()),
        }
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn WorkflowObserver>)>>,
    next_subscription: AtomicU64,
    ids: RunIdGenerator,
}

/// Application-wide holder of the live session and run history.
///
/// Create one at startup and clone it into every view; clones share state.
/// Observers are notified after the state lock is released, so they may call
/// back into the store.
#[derive(Clone)]
pub struct WorkflowStore {
    inner: Arc<StoreInner>,
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT, HashSet::new())
    }
}

impl WorkflowStore {
    pub fn new(history_limit: usize, benign_error_codes: HashSet<String>) -> Self {
        let state = StoreState {
            accumulator: WorkflowAccumulator::new(Arc::new(benign_error_codes)),
            ledger: RunLedger::new(history_limit),
            live: None,
            generation_error: None,
            last_analyzed_at: None,
        };
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                observers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                ids: RunIdGenerator::default(),
            }),
        }
    }

    pub fn from_config(config: &StreamClientConfig) -> Self {
        Self::new(config.history_limit, config.benign_error_codes.clone())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, updates: &[WorkflowUpdate]) {
        if updates.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn WorkflowObserver>> = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for update in updates {
            for observer in &observers {
                observer.on_update(update);
            }
        }
    }

    /// Registers an observer for all future updates.
    pub fn subscribe(&self, observer: Arc<dyn WorkflowObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Registers an observer that forwards updates into a channel.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<WorkflowUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(move |update: &WorkflowUpdate| {
            let _ = tx.send(update.clone());
        }));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    /// Begins a live session.
    ///
    /// Rejected while another session is generating. Clears the live result,
    /// the last error, and any historical view.
    pub fn start(&self, meta: RunMeta) -> Result<SessionToken, StoreError> {
        let mut updates = Vec::new();
        let token = {
            let mut state = self.lock();
            if state.live.is_some() {
                return Err(StoreError::AlreadyGenerating);
            }
            let started_at = Utc::now();
            let token = SessionToken {
                run_id: self.inner.ids.next(started_at),
                session_id: uuid::Uuid::new_v4(),
            };
            if state.ledger.viewing().is_some() {
                state.ledger.view(None)?;
                updates.push(WorkflowUpdate::ViewChanged { viewing: None });
            }
            state.accumulator.start();
            state.generation_error = None;
            state.live = Some(LiveSession {
                token: token.clone(),
                meta: meta.clone(),
                started_at,
            });
            updates.push(WorkflowUpdate::SessionStarted {
                run_id: token.run_id,
                meta,
            });
            token
        };
        self.notify(&updates);
        Ok(token)
    }

    /// Feeds one decoded event to the live session.
    pub fn apply(&self, token: &SessionToken, event: StreamEvent) -> Result<Applied, StoreError> {
        let (applied, update) = {
            let mut state = self.lock();
            state.check(token)?;
            let applied = state.accumulator.apply(event);
            let run_id = token.run_id;
            let update = match &applied {
                Applied::Status { step, message } => Some(WorkflowUpdate::Status {
                    run_id,
                    step: *step,
                    message: message.clone(),
                }),
                Applied::Merged {
                    step,
                    field,
                    authoritative,
                } => Some(WorkflowUpdate::ResultUpdated {
                    run_id,
                    step: step.clone(),
                    field: *field,
                    authoritative: *authoritative,
                    result: Arc::clone(state.accumulator.result()),
                }),
                Applied::StepError { step, message } => Some(WorkflowUpdate::StepError {
                    run_id,
                    step: step.clone(),
                    message: message.clone(),
                }),
                Applied::Completed => Some(WorkflowUpdate::ResultUpdated {
                    run_id,
                    step: "complete".to_string(),
                    field: None,
                    authoritative: true,
                    result: Arc::clone(state.accumulator.result()),
                }),
                Applied::Failed(failure) => {
                    state.generation_error = Some(failure.to_string());
                    None
                }
                Applied::PartialSkipped { .. } | Applied::BenignError { .. } | Applied::Ignored => {
                    None
                }
            };
            (applied, update)
        };
        if let Some(update) = update {
            self.notify(std::slice::from_ref(&update));
        }
        Ok(applied)
    }

    /// Marks the live session failed. Returns false if it already ended.
    pub fn fail(&self, token: &SessionToken, failure: RunFailure) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state.check(token)?;
        let message = failure.to_string();
        let failed = state.accumulator.fail(failure);
        if failed {
            state.generation_error = Some(message);
        }
        Ok(failed)
    }

    /// Turns the live session into an immutable [`RunRecord`] at the head of history.
    ///
    /// The status follows the accumulator: `Completed` gives `complete`, a
    /// cancellation gives `cancelled`, anything else `error`. A session still
    /// running is failed as ended-without-completion first. The live result
    /// stays readable after finalization.
    pub fn finalize(&self, token: &SessionToken) -> Result<Arc<RunRecord>, StoreError> {
        let record = {
            let mut state = self.lock();
            state.check(token)?;
            if state.accumulator.state() == AccumulatorState::Running {
                let failure = RunFailure::EndedWithoutCompletion;
                state.generation_error = Some(failure.to_string());
                state.accumulator.fail(failure);
            }
            let status = match (state.accumulator.state(), state.accumulator.failure()) {
                (AccumulatorState::Completed, _) => RunStatus::Complete,
                (_, Some(RunFailure::Cancelled)) => RunStatus::Cancelled,
                _ => RunStatus::Error,
            };
            let Some(live) = state.live.take() else {
                return Err(StoreError::StaleSession);
            };
            let finished_at = Utc::now();
            let record = Arc::new(RunRecord {
                id: live.token.run_id,
                timestamp: live.started_at,
                finished_at,
                candidate_name: live.meta.candidate_name,
                job_title: live.meta.job_title,
                resume_ids: live.meta.resume_ids,
                result: Arc::clone(state.accumulator.result()),
                status,
                error: state.generation_error.clone(),
            });
            let evicted = state.ledger.push(Arc::clone(&record));
            if !evicted.is_empty() {
                debug!(evicted = evicted.len(), limit = state.ledger.limit(), "trimmed run history");
            }
            if status == RunStatus::Complete {
                state.last_analyzed_at = Some(finished_at);
            }
            record
        };
        info!(run_id = %record.id, status = %record.status, "workflow session finalized");
        self.notify(&[WorkflowUpdate::SessionFinalized {
            record: Arc::clone(&record),
        }]);
        Ok(record)
    }

    /// Drops the live result and error. Rejected while generating.
    pub fn clear_result(&self) -> Result<(), StoreError> {
        {
            let mut state = self.lock();
            if state.live.is_some() {
                return Err(StoreError::AlreadyGenerating);
            }
            state.accumulator.reset();
            state.generation_error = None;
            state.ledger.view(None)?;
        }
        self.notify(&[WorkflowUpdate::ResultCleared]);
        Ok(())
    }

    /// Shows a historical run, or returns to the live session with `None`.
    pub fn set_viewing_history_id(&self, id: Option<RunId>) -> Result<(), StoreError> {
        self.lock().ledger.view(id)?;
        self.notify(&[WorkflowUpdate::ViewChanged { viewing: id }]);
        Ok(())
    }

    /// The viewed run's result, or the live one.
    pub fn active_result(&self) -> Arc<WorkflowResult> {
        self.lock().active_result()
    }

    pub fn is_generating(&self) -> bool {
        self.lock().live.is_some()
    }

    pub fn history(&self) -> Vec<Arc<RunRecord>> {
        self.lock().ledger.records().cloned().collect()
    }

    pub fn record(&self, id: RunId) -> Option<Arc<RunRecord>> {
        self.lock().ledger.get(id).cloned()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.lock();
        let acc = &state.accumulator;
        StoreSnapshot {
            is_generating: state.live.is_some(),
            state: acc.state(),
            streaming_step: acc.current_step(),
            streaming_message: acc.status_message().to_string(),
            workflow_result: state.active_result(),
            live_result: Arc::clone(acc.result()),
            generation_error: state.generation_error.clone(),
            analysis_history: state.ledger.records().cloned().collect(),
            viewing_history_id: state.ledger.viewing(),
            last_analyzed_at: state.last_analyzed_at,
            step_phases: WorkflowStep::ORDER
                .into_iter()
                .map(|step| (step, acc.step_phase(step)))
                .collect(),
        }
    }
}
