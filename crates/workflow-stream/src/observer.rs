use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ledger::{RunId, RunRecord, RunStatus};
use crate::request::RunMeta;
use crate::result::WorkflowResult;
use crate::step::{ResultField, WorkflowStep};

/// Discrete change published by a [`crate::WorkflowStore`].
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowUpdate {
    SessionStarted {
        run_id: RunId,
        meta: RunMeta,
    },
    Status {
        run_id: RunId,
        step: Option<WorkflowStep>,
        message: String,
    },
    /// The live result was replaced; `result` is the new value.
    ResultUpdated {
        run_id: RunId,
        step: String,
        field: Option<ResultField>,
        authoritative: bool,
        result: Arc<WorkflowResult>,
    },
    StepError {
        run_id: RunId,
        step: Option<String>,
        message: String,
    },
    SessionFinalized {
        record: Arc<RunRecord>,
    },
    ResultCleared,
    ViewChanged {
        viewing: Option<RunId>,
    },
}

/// Receives store updates synchronously, in order, as they happen.
///
/// Implementations must not block; they run while the store applies the
/// event that produced the update.
pub trait WorkflowObserver: Send + Sync {
    fn on_update(&self, update: &WorkflowUpdate);
}

impl<F> WorkflowObserver for F
where
    F: Fn(&WorkflowUpdate) + Send + Sync,
{
    fn on_update(&self, update: &WorkflowUpdate) {
        self(update)
    }
}

/// Handle returned by [`crate::WorkflowStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Logs every update through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl WorkflowObserver for TracingObserver {
    fn on_update(&self, update: &WorkflowUpdate) {
        match update {
            WorkflowUpdate::SessionStarted { run_id, meta } => {
                info!(run_id = %run_id, candidate = %meta.candidate_name, job = %meta.job_title, "workflow run started");
            }
            WorkflowUpdate::Status {
                run_id,
                step,
                message,
            } => {
                info!(run_id = %run_id, step = ?step, message = %message, "workflow progress");
            }
            WorkflowUpdate::ResultUpdated {
                run_id,
                step,
                authoritative,
                ..
            } => {
                debug!(run_id = %run_id, step = %step, authoritative, "workflow result updated");
            }
            WorkflowUpdate::StepError {
                run_id,
                step,
                message,
            } => {
                warn!(run_id = %run_id, step = ?step, message = %message, "workflow step reported an error");
            }
            WorkflowUpdate::SessionFinalized { record } => match record.status {
                RunStatus::Complete => {
                    info!(run_id = %record.id, status = %record.status, "workflow run finalized");
                }
                RunStatus::Error | RunStatus::Cancelled => {
                    warn!(run_id = %record.id, status = %record.status, error = ?record.error, "workflow run finalized");
                }
            },
            WorkflowUpdate::ResultCleared => debug!("live workflow result cleared"),
            WorkflowUpdate::ViewChanged { viewing } => {
                debug!(viewing = ?viewing.map(|id| id.to_string()), "viewed run changed");
            }
        }
    }
}
