use std::time::Duration;

use crate::ledger::RunId;

/// Failures of the HTTP leg of a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed before a response.
    #[error("workflow request failed: {message}")]
    Request { message: String },
    /// The endpoint answered with a non-success status.
    #[error("workflow request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response carried no streaming body.
    #[error("workflow response has no body")]
    MissingBody,
    /// Reading the body failed mid-stream.
    #[error("workflow stream read failed: {message}")]
    Read { message: String },
}

impl TransportError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }
}

/// Why a session ended without success.
///
/// The `Display` text is what the UI shows as the generation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// The request never produced a readable stream.
    #[error("{message}")]
    Transport { message: String },
    /// The connection dropped after streaming started.
    #[error("connection lost: {message}")]
    Stream { message: String },
    /// The backend reported a fatal `error` event.
    #[error("{message}")]
    Backend {
        step: Option<String>,
        message: String,
        code: Option<String>,
    },
    /// The body closed without `complete`, `done`, or `error`.
    #[error("workflow stream ended without completion")]
    EndedWithoutCompletion,
    /// No event arrived within the configured idle window.
    #[error("no progress from the workflow for {}", idle_window(.after_ms))]
    IdleTimeout { after_ms: u64 },
    /// The caller aborted the run.
    #[error("run cancelled")]
    Cancelled,
}

impl RunFailure {
    pub fn idle_timeout(window: Duration) -> Self {
        Self::IdleTimeout {
            after_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn idle_window(after_ms: &u64) -> String {
    let after_ms = *after_ms;
    if after_ms % 1000 == 0 {
        format!("{}s", after_ms / 1000)
    } else {
        format!("{after_ms}ms")
    }
}

impl From<TransportError> for RunFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Read { message } => RunFailure::Stream { message },
            other => RunFailure::Transport {
                message: other.to_string(),
            },
        }
    }
}

/// Misuse of the workflow store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A run is already streaming for this store.
    #[error("a workflow run is already in progress")]
    AlreadyGenerating,
    /// The session token does not belong to the live session.
    #[error("session token is not the live session")]
    StaleSession,
    /// No retained run has this id.
    #[error("unknown run: {0}")]
    UnknownRun(RunId),
}

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Errors returned by the session controller API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The session task went away before handing back its record.
    #[error("run task ended without a record")]
    TaskLost,
}
