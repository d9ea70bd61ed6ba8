use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::result::WorkflowResult;

/// Default number of retained runs.
pub const DEFAULT_HISTORY_LIMIT: usize = 25;

/// Identifier of one run: start time plus a per-process sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct RunId {
    pub started_at_ms: i64,
    pub seq: u64,
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}-{}", self.started_at_ms, self.seq)
    }
}

/// Hands out [`RunId`]s that stay unique when runs start in the same millisecond.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    next_seq: AtomicU64,
}

impl RunIdGenerator {
    pub fn next(&self, started_at: DateTime<Utc>) -> RunId {
        RunId {
            started_at_ms: started_at.timestamp_millis(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Error,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        })
    }
}

/// Immutable record of a finished run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidate_name: String,
    pub job_title: String,
    pub resume_ids: Vec<String>,
    /// Shared with the live session that produced it; never mutated afterwards.
    pub result: Arc<WorkflowResult>,
    pub status: RunStatus,
    /// Generation error shown to the user, if the run did not complete.
    pub error: Option<String>,
}

/// Bounded run history, newest first, plus the optional "viewed" run.
#[derive(Debug)]
pub struct RunLedger {
    records: VecDeque<Arc<RunRecord>>,
    limit: usize,
    viewing: Option<RunId>,
}

impl Default for RunLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl RunLedger {
    /// Creates a ledger retaining at most `limit` runs (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            records: VecDeque::with_capacity(limit),
            limit,
            viewing: None,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Prepends a record and returns any records pushed past the limit.
    pub fn push(&mut self, record: Arc<RunRecord>) -> Vec<Arc<RunRecord>> {
        self.records.push_front(record);
        let mut evicted = Vec::new();
        while self.records.len() > self.limit {
            if let Some(old) = self.records.pop_back() {
                evicted.push(old);
            }
        }
        if let Some(id) = self.viewing
            && evicted.iter().any(|r| r.id == id)
        {
            self.viewing = None;
        }
        evicted
    }

    pub fn get(&self, id: RunId) -> Option<&Arc<RunRecord>> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Option<&Arc<RunRecord>> {
        self.records.front()
    }

    /// Records, newest first.
    pub fn records(&self) -> impl Iterator<Item = &Arc<RunRecord>> {
        self.records.iter()
    }

    pub fn viewing(&self) -> Option<RunId> {
        self.viewing
    }

    /// Points the view at a retained run, or back at the live session with `None`.
    pub fn view(&mut self, id: Option<RunId>) -> Result<(), StoreError> {
        if let Some(id) = id
            && self.get(id).is_none()
        {
            return Err(StoreError::UnknownRun(id));
        }
        self.viewing = id;
        Ok(())
    }

    /// The viewed record, if the view is not on the live session.
    pub fn viewed_record(&self) -> Option<&Arc<RunRecord>> {
        self.viewing.and_then(|id| self.get(id))
    }
}
