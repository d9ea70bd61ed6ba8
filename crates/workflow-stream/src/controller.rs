use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::StreamClientConfig;
use crate::errors::{ControllerError, RunFailure};
use crate::event::decode_line;
use crate::framer::frame_lines;
use crate::ledger::{RunId, RunRecord};
use crate::request::{RunMeta, WorkflowRequest};
use crate::store::{SessionToken, WorkflowStore};
use crate::transport::{HttpTransport, WorkflowTransport};

/// Handle used to cancel a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The session stops reading at its next suspension point and is
    /// finalized with status `cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Handle to a session started by [`StreamSessionController::start_workflow`].
///
/// Dropping the handle does not cancel the session; its record still lands in
/// the store's history.
pub struct RunHandle {
    run_id: RunId,
    abort_handle: AbortHandle,
    record_rx: oneshot::Receiver<Arc<RunRecord>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn abort(&self) {
        self.abort_handle.abort();
    }

    /// Waits for the session to end and returns its record.
    pub async fn finish(self) -> Result<Arc<RunRecord>, ControllerError> {
        self.record_rx.await.map_err(|_| ControllerError::TaskLost)
    }
}

/// Drives one workflow invocation from request to run record.
///
/// At most one session runs per store; a second start while one is
/// generating fails with [`crate::StoreError::AlreadyGenerating`].
#[derive(Clone)]
pub struct StreamSessionController {
    store: WorkflowStore,
    transport: Arc<dyn WorkflowTransport>,
    idle_timeout: Option<Duration>,
}

impl StreamSessionController {
    pub fn new(store: WorkflowStore, transport: Arc<dyn WorkflowTransport>) -> Self {
        Self {
            store,
            transport,
            idle_timeout: None,
        }
    }

    /// Builds a store and an HTTP transport from one config.
    pub fn from_config(config: &StreamClientConfig) -> Result<Self, ControllerError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(WorkflowStore::from_config(config), Arc::new(transport))
            .idle_timeout(config.idle_timeout))
    }

    /// Fails a session that goes this long without a decoded event.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Starts a session in the background and returns its handle.
    pub async fn start_workflow(
        &self,
        request: WorkflowRequest,
        meta: RunMeta,
    ) -> Result<RunHandle, ControllerError> {
        let token = self.store.start(meta)?;
        let run_id = token.run_id();
        let (abort_tx, abort_rx) = watch::channel(false);
        let (record_tx, record_rx) = oneshot::channel();
        info!(run_id = %run_id, "starting workflow session");

        tokio::spawn(run_session(
            self.store.clone(),
            Arc::clone(&self.transport),
            token,
            request,
            self.idle_timeout,
            abort_rx,
            record_tx,
        ));

        Ok(RunHandle {
            run_id,
            abort_handle: AbortHandle { tx: abort_tx },
            record_rx,
        })
    }

    /// Runs a session to its end.
    pub async fn run(
        &self,
        request: WorkflowRequest,
        meta: RunMeta,
    ) -> Result<Arc<RunRecord>, ControllerError> {
        self.start_workflow(request, meta).await?.finish().await
    }
}

async fn run_session(
    store: WorkflowStore,
    transport: Arc<dyn WorkflowTransport>,
    token: SessionToken,
    request: WorkflowRequest,
    idle_timeout: Option<Duration>,
    mut abort_rx: watch::Receiver<bool>,
    record_tx: oneshot::Sender<Arc<RunRecord>>,
) {
    let run_id = token.run_id();
    let outcome = pump(
        &store,
        &token,
        transport.as_ref(),
        &request,
        idle_timeout,
        &mut abort_rx,
    )
    .await;
    if let Err(failure) = outcome {
        match &failure {
            RunFailure::Transport { .. } | RunFailure::Stream { .. } => {
                error!(run_id = %run_id, error = %failure, "workflow transport failed")
            }
            RunFailure::Cancelled => info!(run_id = %run_id, "workflow session cancelled"),
            _ => warn!(run_id = %run_id, error = %failure, "workflow session failed"),
        }
        if let Err(e) = store.fail(&token, failure) {
            warn!(run_id = %run_id, error = %e, "could not mark session failed");
        }
    }
    match store.finalize(&token) {
        Ok(record) => {
            let _ = record_tx.send(record);
        }
        Err(e) => warn!(run_id = %run_id, error = %e, "could not finalize session"),
    }
}

/// Reads the stream into the store until a terminal event.
///
/// `Ok` means the accumulator reached a terminal state on its own; `Err`
/// carries the failure the caller should record.
async fn pump(
    store: &WorkflowStore,
    token: &SessionToken,
    transport: &dyn WorkflowTransport,
    request: &WorkflowRequest,
    idle_timeout: Option<Duration>,
    abort_rx: &mut watch::Receiver<bool>,
) -> Result<(), RunFailure> {
    let run_id = token.run_id();
    let idle_failure = || RunFailure::idle_timeout(idle_timeout.unwrap_or_default());
    let mut deadline = idle_timeout.map(|d| Instant::now() + d);
    let body = tokio::select! {
        opened = transport.open(request) => opened?,
        _ = cancelled(abort_rx) => return Err(RunFailure::Cancelled),
        _ = idle_until(deadline) => return Err(idle_failure()),
    };
    let mut lines = Box::pin(frame_lines(body));
    let mut seq = 0_u64;

    loop {
        tokio::select! {
            _ = cancelled(abort_rx) => return Err(RunFailure::Cancelled),
            _ = idle_until(deadline) => return Err(idle_failure()),
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    let Some(event) = decode_line(&line) else {
                        continue;
                    };
                    deadline = idle_timeout.map(|d| Instant::now() + d);
                    debug!(run_id = %run_id, seq, event_type = event.kind(), "workflow stream event");
                    seq = seq.saturating_add(1);
                    match store.apply(token, event) {
                        Ok(applied) if applied.is_terminal() => return Ok(()),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(run_id = %run_id, error = %e, "store rejected stream event");
                            return Ok(());
                        }
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(RunFailure::EndedWithoutCompletion),
            }
        }
    }
}

/// Resolves at `deadline`; never resolves without one.
async fn idle_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Resolves once cancellation is requested; never resolves if the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{StoreError, TransportError};
    use crate::framer::ByteStream;
    use crate::ledger::RunStatus;
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Chunk = Result<bytes::Bytes, TransportError>;

    enum FakeBehavior {
        ImmediateError(TransportError),
        Chunks(Vec<Chunk>),
        ChunksThenPending(Vec<Chunk>),
        NeverResponds,
    }

    struct FakeTransport {
        calls: Arc<AtomicUsize>,
        behavior: FakeBehavior,
    }

    #[async_trait::async_trait]
    impl WorkflowTransport for FakeTransport {
        async fn open(&self, _request: &WorkflowRequest) -> Result<ByteStream, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                FakeBehavior::NeverResponds => std::future::pending().await,
                FakeBehavior::ImmediateError(err) => Err(err.clone()),
                FakeBehavior::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks.clone()))),
                FakeBehavior::ChunksThenPending(chunks) => Ok(Box::pin(
                    stream::iter(chunks.clone()).chain(stream::pending()),
                )),
            }
        }
    }

    fn lines(lines: &[&str]) -> Vec<Chunk> {
        lines
            .iter()
            .map(|l| Ok(bytes::Bytes::from(format!("data: {l}\n"))))
            .collect()
    }

    fn controller(behavior: FakeBehavior) -> StreamSessionController {
        counted_controller(behavior).0
    }

    fn counted_controller(behavior: FakeBehavior) -> (StreamSessionController, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctl = StreamSessionController::new(
            WorkflowStore::default(),
            Arc::new(FakeTransport {
                calls: Arc::clone(&calls),
                behavior,
            }),
        );
        (ctl, calls)
    }

    fn request() -> (WorkflowRequest, RunMeta) {
        let request = WorkflowRequest::new("Senior data engineer")
            .job_metadata(json!({"title": "Data Engineer"}))
            .candidate(crate::CandidateRef::standalone_resume("r1", "Ada"));
        let meta = RunMeta::for_request(&request);
        (request, meta)
    }

    #[tokio::test]
    async fn end_to_end_stream_produces_complete_record() {
        let ctl = controller(FakeBehavior::Chunks(lines(&[
            r#"{"type":"status","step":"core_skills","message":"Analyzing..."}"#,
            r#"{"type":"result","step":"core_skills","data":[{"name":"SQL","reason":"required"}]}"#,
            r#"{"type":"status","step":"ai_analysis","message":"Writing analysis..."}"#,
            r##"{"type":"result","step":"ai_analysis_markdown","data":"# Summary"}"##,
            r#"{"type":"complete","data":{}}"#,
        ])));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Complete);
        assert_eq!(record.result.core_skills.len(), 1);
        assert_eq!(record.result.ai_analysis_markdown, "# Summary");
        assert_eq!(record.candidate_name, "Ada");
        assert_eq!(record.job_title, "Data Engineer");

        let snapshot = ctl.store().snapshot();
        assert!(!snapshot.is_generating);
        assert_eq!(snapshot.analysis_history.len(), 1);
        assert_eq!(snapshot.streaming_message, "Writing analysis...");
        assert_eq!(snapshot.generation_error, None);
        assert!(snapshot.last_analyzed_at.is_some());
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_keeps_partial_progress() {
        let ctl = controller(FakeBehavior::Chunks(lines(&[
            r#"{"type":"result","step":"core_skills","data":[{"name":"SQL"}]}"#,
        ])));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.result.core_skills.len(), 1);
        assert_eq!(
            record.error.as_deref(),
            Some("workflow stream ended without completion")
        );
        assert_eq!(ctl.store().history().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_finalizes_immediately() {
        let (ctl, calls) = counted_controller(FakeBehavior::ImmediateError(TransportError::Status {
            status: 503,
            body: "overloaded".into(),
        }));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Error);
        assert!(record.result.is_empty());
        let error = ctl.store().snapshot().generation_error.expect("error");
        assert!(error.contains("503"), "{error}");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "failed runs are not retried");
        assert_eq!(ctl.store().history().len(), 1);
    }

    #[tokio::test]
    async fn mid_stream_read_error_preserves_partial_result() {
        let mut chunks = lines(&[r#"{"type":"result","step":"ranked_shortlist","data":[{"id":"c1"}]}"#]);
        chunks.push(Err(TransportError::read("connection reset")));
        let ctl = controller(FakeBehavior::Chunks(chunks));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.result.ranked_shortlist.len(), 1);
        assert_eq!(record.error.as_deref(), Some("connection lost: connection reset"));
    }

    #[tokio::test]
    async fn backend_error_event_is_fatal() {
        let ctl = controller(FakeBehavior::ChunksThenPending(lines(&[
            r#"{"type":"result","step":"core_skills","data":["SQL"]}"#,
            r#"{"type":"error","step":"ranked_shortlist","message":"ranking model unavailable"}"#,
        ])));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.error.as_deref(), Some("ranking model unavailable"));
        assert_eq!(record.result.core_skills.len(), 1);
    }

    #[tokio::test]
    async fn events_after_complete_are_not_read() {
        let ctl = controller(FakeBehavior::Chunks(lines(&[
            r#"{"type":"result","step":"core_skills","data":["SQL"]}"#,
            r#"{"type":"done"}"#,
            r#"{"type":"result","step":"core_skills","data":["late"]}"#,
            r#"{"type":"error","message":"late failure"}"#,
        ])));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Complete);
        assert_eq!(record.result.core_skills, vec![json!("SQL")]);
        assert_eq!(ctl.store().history().len(), 1);
        assert_eq!(*ctl.store().history()[0], *record);
    }

    #[tokio::test]
    async fn arbitrary_chunking_decodes_the_same_events() {
        let body = concat!(
            "data: {\"type\":\"status\",\"step\":\"core_skills\",\"message\":\"Fähigkeiten…\"}\n",
            ": keep-alive\n",
            "data: {\"type\":\"result\",\"step\":\"core_skills\",\"data\":[\"ŠQL\"]}\n",
            "data: {\"type\":\"complete\",\"data\":{\"ranked_shortlist\":[{\"id\":\"c1\"}]}}\n",
        )
        .as_bytes();
        let chunks: Vec<Chunk> = body
            .chunks(7)
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        let ctl = controller(FakeBehavior::Chunks(chunks));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Complete);
        assert_eq!(record.result.core_skills, vec![json!("ŠQL")]);
        assert_eq!(record.result.ranked_shortlist.len(), 1);
        assert_eq!(ctl.store().snapshot().streaming_message, "Fähigkeiten…");
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_generating() {
        let ctl = controller(FakeBehavior::ChunksThenPending(Vec::new()));
        let (req, meta) = request();
        let handle = ctl
            .start_workflow(req.clone(), meta.clone())
            .await
            .expect("first start");
        let second = ctl.start_workflow(req, meta).await;
        assert!(matches!(
            second,
            Err(ControllerError::Store(StoreError::AlreadyGenerating))
        ));
        handle.abort();
        let record = handle.finish().await.expect("finish");
        assert_eq!(record.status, RunStatus::Cancelled);
        assert_eq!(ctl.store().history().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_result() {
        let ctl = controller(FakeBehavior::ChunksThenPending(lines(&[
            r#"{"type":"result","step":"core_skills","data":["SQL"]}"#,
        ])));
        let (sub, mut updates) = ctl.store().subscribe_channel();
        let (req, meta) = request();
        let handle = ctl.start_workflow(req, meta).await.expect("start");

        while let Some(update) = updates.recv().await {
            if matches!(update, crate::WorkflowUpdate::ResultUpdated { .. }) {
                break;
            }
        }
        handle.abort();
        let record = handle.finish().await.expect("finish");
        assert_eq!(record.status, RunStatus::Cancelled);
        assert_eq!(record.result.core_skills, vec![json!("SQL")]);
        assert_eq!(record.error.as_deref(), Some("run cancelled"));
        assert!(ctl.store().unsubscribe(sub));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_times_out() {
        let ctl = controller(FakeBehavior::ChunksThenPending(lines(&[
            r#"{"type":"status","step":"core_skills","message":"Analyzing..."}"#,
        ])))
        .idle_timeout(Some(Duration::from_secs(30)));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");

        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(
            record.error.as_deref(),
            Some("no progress from the workflow for 30s")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_endpoint_times_out_before_any_body() {
        let (ctl, calls) = counted_controller(FakeBehavior::NeverResponds);
        let ctl = ctl.idle_timeout(Some(Duration::from_secs(30)));
        let (req, meta) = request();
        let record = tokio::time::timeout(Duration::from_secs(3600), ctl.run(req.clone(), meta.clone()))
            .await
            .expect("session finalized")
            .expect("run");

        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(
            record.error.as_deref(),
            Some("no progress from the workflow for 30s")
        );
        assert!(!ctl.store().is_generating());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let handle = ctl.start_workflow(req, meta).await.expect("store is free again");
        handle.abort();
        assert_eq!(handle.finish().await.expect("finish").status, RunStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_idle_timeout_is_reported_in_millis() {
        let ctl = controller(FakeBehavior::ChunksThenPending(Vec::new()))
            .idle_timeout(Some(Duration::from_millis(500)));
        let (req, meta) = request();
        let record = ctl.run(req, meta).await.expect("run");
        assert_eq!(
            record.error.as_deref(),
            Some("no progress from the workflow for 500ms")
        );
    }

    #[tokio::test]
    async fn env_gated_smoke_run_if_endpoint_present() {
        let config = match StreamClientConfig::from_env() {
            Ok(config) => config,
            Err(_) => {
                eprintln!("skipping workflow stream smoke test (WORKFLOW_STREAM_URL missing)");
                return;
            }
        };
        let ctl = StreamSessionController::from_config(&config).expect("controller");
        let (req, meta) = request();
        let record = ctl.run(req, meta).await;
        assert!(record.is_ok(), "smoke run failed: {record:?}");
    }
}
