use std::io::Write;
use std::sync::Mutex;

use workflow_stream::{RunStatus, WorkflowObserver, WorkflowUpdate};

/// Writes one human-readable line per progress update.
pub struct ProgressPrinter<W: Write + Send> {
    out: Mutex<W>,
}

impl ProgressPrinter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> ProgressPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn render(update: &WorkflowUpdate) -> Option<String> {
    match update {
        WorkflowUpdate::SessionStarted { run_id, meta } => Some(format!(
            "started {run_id} for {} / {}",
            display_or(&meta.candidate_name, "unnamed candidate"),
            display_or(&meta.job_title, "untitled job"),
        )),
        WorkflowUpdate::Status { step, message, .. } => Some(match step {
            Some(step) => format!("[{step}] {message}"),
            None => format!("[..] {message}"),
        }),
        WorkflowUpdate::ResultUpdated {
            step,
            authoritative: true,
            ..
        } if step != "complete" => Some(format!("  done: {step}")),
        WorkflowUpdate::StepError { step, message, .. } => Some(format!(
            "  step error ({}): {message}",
            step.as_deref().unwrap_or("workflow")
        )),
        WorkflowUpdate::SessionFinalized { record } => Some(match record.status {
            RunStatus::Complete => format!("finished {} ({})", record.id, record.status),
            _ => format!(
                "finished {} ({}): {}",
                record.id,
                record.status,
                record.error.as_deref().unwrap_or("unknown error")
            ),
        }),
        _ => None,
    }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

impl<W: Write + Send> WorkflowObserver for ProgressPrinter<W> {
    fn on_update(&self, update: &WorkflowUpdate) {
        let Some(line) = render(update) else {
            return;
        };
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}
