use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENV_ENABLED: [&str; 2] = [
    "WORKFLOW_STREAM_OBSERVABILITY_ENABLED",
    "WORKFLOW_STREAM_OBSERVABILITY",
];
const ENV_LOG_LEVEL: &str = "WORKFLOW_STREAM_LOG_LEVEL";
const ENV_JSON_LOG_PATH: &str = "WORKFLOW_STREAM_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "workflow-stream.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, PartialEq)]
enum LogOutput {
    /// Compact lines on stderr; stdout stays free for run records.
    Console,
    JsonFile { dir: PathBuf, file_name: String },
}

#[derive(Debug, PartialEq)]
struct LogSettings {
    enabled: bool,
    /// Explicit filter directive; falls back to `RUST_LOG`, then `info`.
    level: Option<String>,
    output: LogOutput,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENV_ENABLED
            .iter()
            .find_map(|key| lookup(key))
            .is_none_or(|raw| parse_bool_env(&raw).unwrap_or(true));
        let level = lookup(ENV_LOG_LEVEL).filter(|l| !l.trim().is_empty());
        let output = match lookup(ENV_JSON_LOG_PATH).filter(|p| !p.trim().is_empty()) {
            Some(raw) => json_file_output(Path::new(raw.trim())),
            None => LogOutput::Console,
        };
        Self {
            enabled,
            level,
            output,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn json_file_output(path: &Path) -> LogOutput {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogOutput::JsonFile { dir, file_name }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the global `tracing` subscriber once per process.
///
/// Environment variables:
/// - `WORKFLOW_STREAM_OBSERVABILITY_ENABLED` / `WORKFLOW_STREAM_OBSERVABILITY`: set to `false` to skip setup.
/// - `WORKFLOW_STREAM_LOG_LEVEL`: filter directive (`info`, `workflow_stream=debug`, ...), then `RUST_LOG`.
/// - `WORKFLOW_STREAM_JSON_LOG_PATH`: write JSON lines to this file instead of stderr.
///
/// A subscriber installed earlier by the host application wins.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_lookup(|key| std::env::var(key).ok());
        if settings.enabled {
            install(&settings);
        }
    });
}

fn install(settings: &LogSettings) {
    let registry = tracing_subscriber::registry().with(settings.env_filter());
    match &settings.output {
        LogOutput::JsonFile { dir, file_name } => {
            let _ = std::fs::create_dir_all(dir);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = registry.with(layer).try_init();
        }
        LogOutput::Console => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = registry.with(layer).try_init();
        }
    }
}
