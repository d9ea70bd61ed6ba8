//! Common imports for driving a workflow session.
pub use crate::{
    AbortHandle, CandidateRef, ControllerError, RunHandle, RunMeta, RunRecord, RunStatus,
    StreamClientConfig, StreamSessionController, TracingObserver, WorkflowObserver,
    WorkflowRequest, WorkflowResult, WorkflowStep, WorkflowStore, WorkflowUpdate,
};
