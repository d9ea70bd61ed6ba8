use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::RunFailure;
use crate::event::StreamEvent;
use crate::result::{FieldValue, WorkflowResult};
use crate::step::{ResultField, StepPhase, WorkflowStep};

/// Lifecycle of the live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// What applying one event did.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// Current step and status message changed.
    Status {
        step: Option<WorkflowStep>,
        message: String,
    },
    /// A step payload was written into the result.
    Merged {
        step: String,
        field: Option<ResultField>,
        authoritative: bool,
    },
    /// A partial payload lost to a finalized or already-filled field.
    PartialSkipped { step: String },
    /// A non-fatal step error was recorded.
    StepError {
        step: Option<String>,
        message: String,
    },
    /// An allow-listed error code was dropped.
    BenignError { code: String },
    Completed,
    Failed(RunFailure),
    /// The event arrived outside `Running` and changed nothing.
    Ignored,
}

impl Applied {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Applied::Completed | Applied::Failed(_))
    }
}

/// Merges stream events into the live [`WorkflowResult`].
///
/// The result sits behind an `Arc` and is replaced copy-on-write, so any
/// snapshot handed out earlier keeps seeing the value it was given.
pub struct WorkflowAccumulator {
    state: AccumulatorState,
    current_step: Option<WorkflowStep>,
    status_message: String,
    result: Arc<WorkflowResult>,
    finalized: BTreeSet<String>,
    failure: Option<RunFailure>,
    benign_error_codes: Arc<HashSet<String>>,
}

impl Default for WorkflowAccumulator {
    fn default() -> Self {
        Self::new(Arc::new(HashSet::new()))
    }
}

impl WorkflowAccumulator {
    pub fn new(benign_error_codes: Arc<HashSet<String>>) -> Self {
        Self {
            state: AccumulatorState::Idle,
            current_step: None,
            status_message: String::new(),
            result: Arc::new(WorkflowResult::default()),
            finalized: BTreeSet::new(),
            failure: None,
            benign_error_codes,
        }
    }

    /// Enters `Running` with an empty result.
    pub fn start(&mut self) {
        self.state = AccumulatorState::Running;
        self.current_step = None;
        self.status_message.clear();
        self.result = Arc::new(WorkflowResult::default());
        self.finalized.clear();
        self.failure = None;
    }

    /// Drops the live result and returns to `Idle`.
    pub fn reset(&mut self) {
        self.start();
        self.state = AccumulatorState::Idle;
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            AccumulatorState::Completed | AccumulatorState::Failed
        )
    }

    pub fn current_step(&self) -> Option<WorkflowStep> {
        self.current_step
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn result(&self) -> &Arc<WorkflowResult> {
        &self.result
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn step_phase(&self, step: WorkflowStep) -> StepPhase {
        step.phase(
            self.current_step,
            self.state == AccumulatorState::Completed,
        )
    }

    pub fn is_step_done(&self, step: WorkflowStep) -> bool {
        self.step_phase(step) == StepPhase::Done
    }

    /// Applies one decoded event.
    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        if self.state != AccumulatorState::Running {
            debug!(event_type = event.kind(), state = ?self.state, "ignoring event outside running session");
            return Applied::Ignored;
        }
        match event {
            StreamEvent::Status { step, message } => {
                if let Some(parsed) = WorkflowStep::from_wire(&step) {
                    self.current_step = Some(parsed);
                }
                self.status_message = message.clone();
                Applied::Status {
                    step: self.current_step,
                    message,
                }
            }
            StreamEvent::Partial { step, data } => self.merge(step, data, false),
            StreamEvent::Result { step, data } => self.merge(step, data, true),
            StreamEvent::Complete { data } => {
                let changed = Arc::make_mut(&mut self.result).reconcile_terminal(&data);
                debug!(fields = changed.len(), "terminal payload reconciled");
                self.state = AccumulatorState::Completed;
                Applied::Completed
            }
            StreamEvent::Done => {
                self.state = AccumulatorState::Completed;
                Applied::Completed
            }
            StreamEvent::Error {
                step,
                message,
                code,
                fatal,
            } => {
                if let Some(code) = code.as_ref().filter(|c| self.benign_error_codes.contains(*c)) {
                    warn!(code = %code, step = ?step, "ignoring benign workflow error");
                    return Applied::BenignError { code: code.clone() };
                }
                if fatal == Some(false) {
                    let key = step.clone().unwrap_or_else(|| "workflow".to_string());
                    Arc::make_mut(&mut self.result)
                        .step_errors
                        .insert(key, message.clone());
                    return Applied::StepError { step, message };
                }
                let failure = RunFailure::Backend {
                    step,
                    message,
                    code,
                };
                self.fail(failure.clone());
                Applied::Failed(failure)
            }
        }
    }

    /// Moves a running session to `Failed`. Returns false if already terminal.
    pub fn fail(&mut self, failure: RunFailure) -> bool {
        if self.state != AccumulatorState::Running {
            return false;
        }
        self.state = AccumulatorState::Failed;
        self.failure = Some(failure);
        true
    }

    fn merge(&mut self, step: String, data: Value, authoritative: bool) -> Applied {
        let field = ResultField::from_wire(&step);
        let key = field.map_or_else(|| step.clone(), |f| f.key().to_string());

        if !authoritative {
            if self.finalized.contains(&key) {
                return Applied::PartialSkipped { step };
            }
            if let Some(field) = field {
                if !self.result.is_field_empty(field) {
                    return Applied::PartialSkipped { step };
                }
                let result = Arc::make_mut(&mut self.result);
                result.set_field(field, FieldValue::from_json(field, data.clone()));
                result.steps.insert(key, data);
            } else {
                Arc::make_mut(&mut self.result).steps.insert(key, data);
            }
            return Applied::Merged {
                step,
                field,
                authoritative,
            };
        }

        let result = Arc::make_mut(&mut self.result);
        if let Some(field) = field {
            result.set_field(field, FieldValue::from_json(field, data.clone()));
        }
        result.steps.insert(key.clone(), data);
        self.finalized.insert(key);
        Applied::Merged {
            step,
            field,
            authoritative,
        }
    }
}
