//! Command-line front end for the streaming analysis workflow.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use workflow_stream::prelude::*;

use crate::progress::ProgressPrinter;

#[derive(Parser)]
#[command(name = "workflow-stream", about = "Run the AI candidate-analysis workflow")]
enum Cli {
    /// Post a request and stream the analysis until it finishes
    Run {
        /// JSON file holding the request body
        #[arg(long)]
        payload: PathBuf,
        /// Endpoint URL (overrides WORKFLOW_STREAM_URL)
        #[arg(long)]
        url: Option<String>,
        /// Seconds without an event before the run fails (0 disables)
        #[arg(long)]
        idle_timeout_secs: Option<u64>,
        /// Candidate name stored on the run record
        #[arg(long)]
        candidate_name: Option<String>,
        /// Job title stored on the run record
        #[arg(long)]
        job_title: Option<String>,
    },
    /// Print the workflow steps in order
    Steps,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    workflow_stream::init_observability();

    match Cli::parse() {
        Cli::Run {
            payload,
            url,
            idle_timeout_secs,
            candidate_name,
            job_title,
        } => {
            let config = resolve_config(url, idle_timeout_secs)?;
            let request = read_request(&payload)?;
            let mut meta = RunMeta::for_request(&request);
            if let Some(name) = candidate_name {
                meta.candidate_name = name;
            }
            if let Some(title) = job_title {
                meta.job_title = title;
            }
            run(config, request, meta).await
        }
        Cli::Steps => {
            for (i, step) in WorkflowStep::ORDER.iter().enumerate() {
                println!("{}. {step}", i + 1);
            }
            Ok(())
        }
    }
}

fn resolve_config(url: Option<String>, idle_timeout_secs: Option<u64>) -> Result<StreamClientConfig> {
    let mut config = StreamClientConfig::from_env_with_endpoint(url)
        .context("loading workflow stream config (set WORKFLOW_STREAM_URL or pass --url)")?;
    if let Some(secs) = idle_timeout_secs {
        config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    config.validate().context("validating workflow stream config")?;
    Ok(config)
}

fn read_request(path: &PathBuf) -> Result<WorkflowRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading payload {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing payload {}", path.display()))
}

async fn run(config: StreamClientConfig, request: WorkflowRequest, meta: RunMeta) -> Result<()> {
    let controller = StreamSessionController::from_config(&config)?;
    controller.store().subscribe(Arc::new(TracingObserver));
    controller
        .store()
        .subscribe(Arc::new(ProgressPrinter::stderr()));

    let handle = controller.start_workflow(request, meta).await?;
    let abort = handle.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling run...");
            abort.abort();
        }
    });

    let record = handle.finish().await?;
    ctrl_c.abort();

    println!("{}", serde_json::to_string_pretty(record.as_ref())?);
    match record.status {
        RunStatus::Complete => Ok(()),
        status => bail!(
            "run {} ended with status {status}: {}",
            record.id,
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
