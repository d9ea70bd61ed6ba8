//! Client for the streaming AI analysis workflow.
//!
//! A [`StreamSessionController`] posts a [`WorkflowRequest`], frames the SSE
//! response into lines, decodes them into [`StreamEvent`]s and folds them into
//! a [`WorkflowStore`], which keeps the live result and a bounded history of
//! finished runs.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use workflow_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ControllerError> {
//! let config = StreamClientConfig::from_env()?;
//! let controller = StreamSessionController::from_config(&config)?;
//! controller.store().subscribe(Arc::new(TracingObserver));
//!
//! let request = WorkflowRequest::new("Senior data engineer, SQL and Go")
//!     .candidate(CandidateRef::standalone_resume("resume-1", "Ada"));
//! let meta = RunMeta::for_request(&request);
//! let record = controller.run(request, meta).await?;
//!
//! println!("{} ({})", record.id, record.status);
//! # Ok(())
//! # }
//! ```

/// Merge state machine for one live session.
pub mod accumulator;
/// Client configuration.
pub mod config;
/// Session controller, run handle and cancellation.
pub mod controller;
/// Error types.
pub mod errors;
/// Wire events and the line decoder.
pub mod event;
/// Byte-to-line framing.
pub mod framer;
/// Run records and bounded history.
pub mod ledger;
/// Process-wide logging setup.
pub mod observability;
/// Store update notifications.
pub mod observer;
/// Common imports.
pub mod prelude;
/// Request body and run metadata.
pub mod request;
/// Aggregated workflow result.
pub mod result;
/// Workflow steps and result fields.
pub mod step;
/// Application-wide workflow state.
pub mod store;
/// HTTP leg of a session.
pub mod transport;

pub use accumulator::{AccumulatorState, Applied, WorkflowAccumulator};
pub use config::StreamClientConfig;
pub use controller::{AbortHandle, RunHandle, StreamSessionController};
pub use errors::{ConfigError, ControllerError, RunFailure, StoreError, TransportError};
pub use event::{StreamEvent, decode_line};
pub use framer::{ByteStream, LineFramer, frame_lines};
pub use ledger::{RunId, RunLedger, RunRecord, RunStatus};
pub use observability::init_observability;
pub use observer::{SubscriptionId, TracingObserver, WorkflowObserver, WorkflowUpdate};
pub use request::{CandidateRef, RunMeta, WorkflowRequest};
pub use result::WorkflowResult;
pub use step::{ResultField, StepPhase, WorkflowStep};
pub use store::{SessionToken, StoreSnapshot, WorkflowStore};
pub use transport::{HttpTransport, WorkflowTransport};
