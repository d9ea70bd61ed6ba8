use serde_json::Value;
use tracing::{debug, warn};

/// Events emitted by the backend workflow stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Progress narration for a step. Carries no data.
    Status { step: String, message: String },
    /// Speculative data for a step; a later `Result` for the same step wins.
    Partial { step: String, data: Value },
    /// Authoritative data for a step.
    Result { step: String, data: Value },
    /// Terminal success with the full aggregate.
    Complete { data: Value },
    /// Failure reported by the backend.
    Error {
        step: Option<String>,
        message: String,
        /// Machine-readable error code, matched against the benign allow-list.
        code: Option<String>,
        /// `Some(false)` marks a step-local error the run survives.
        fatal: Option<bool>,
    },
    /// Stream-closed marker.
    Done,
}

impl StreamEvent {
    /// Wire name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Partial { .. } => "partial",
            Self::Result { .. } => "result",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

#[derive(serde::Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    step: Option<String>,
    message: Option<String>,
    data: Option<Value>,
    code: Option<String>,
    fatal: Option<bool>,
}

/// Decodes one SSE line.
///
/// Returns `None` for non-`data:` lines, malformed JSON, unknown event types,
/// and events missing a required field. Never fails.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(StreamEvent::Done);
    }
    let raw: RawEvent = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, line_len = line.len(), "discarding malformed stream event");
            return None;
        }
    };
    from_raw(raw)
}

fn from_raw(raw: RawEvent) -> Option<StreamEvent> {
    let event = match raw.kind.as_str() {
        "status" => StreamEvent::Status {
            step: required(raw.step, "status", "step")?,
            message: raw.message.unwrap_or_default(),
        },
        "partial" => StreamEvent::Partial {
            step: required(raw.step, "partial", "step")?,
            data: raw.data.unwrap_or(Value::Null),
        },
        "result" => StreamEvent::Result {
            step: required(raw.step, "result", "step")?,
            data: raw.data.unwrap_or(Value::Null),
        },
        "complete" => StreamEvent::Complete {
            data: raw.data.unwrap_or(Value::Null),
        },
        "error" => StreamEvent::Error {
            step: raw.step,
            message: required(raw.message, "error", "message")?,
            code: raw.code,
            fatal: raw.fatal,
        },
        "done" => StreamEvent::Done,
        other => {
            debug!(event_type = other, "ignoring unknown stream event type");
            return None;
        }
    };
    Some(event)
}

fn required(value: Option<String>, kind: &str, field: &str) -> Option<String> {
    if value.is_none() {
        warn!(event_type = kind, field, "discarding stream event without required field");
    }
    value
}
