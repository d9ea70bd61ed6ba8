use std::collections::HashSet;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::ledger::DEFAULT_HISTORY_LIMIT;

const ENV_URL: &str = "WORKFLOW_STREAM_URL";
const ENV_TOKEN: &str = "WORKFLOW_STREAM_TOKEN";
const ENV_IDLE_TIMEOUT: &str = "WORKFLOW_STREAM_IDLE_TIMEOUT_SECS";
const ENV_HISTORY_LIMIT: &str = "WORKFLOW_STREAM_HISTORY_LIMIT";
const ENV_BENIGN_CODES: &str = "WORKFLOW_STREAM_BENIGN_ERROR_CODES";

/// Settings for talking to the workflow-generation endpoint.
#[derive(Clone, Debug)]
pub struct StreamClientConfig {
    /// Full URL of the streaming POST endpoint.
    pub endpoint_url: String,
    /// Optional bearer token forwarded to the backend.
    pub bearer_token: Option<String>,
    /// Connect timeout for the HTTP client. The body read itself is unbounded
    /// and guarded by `idle_timeout` instead.
    pub connect_timeout: Duration,
    /// Fail the run if no event arrives for this long. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Number of finished runs kept in history.
    pub history_limit: usize,
    /// Backend error codes that are logged and otherwise ignored.
    pub benign_error_codes: HashSet<String>,
}

impl StreamClientConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            bearer_token: None,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(120)),
            history_limit: DEFAULT_HISTORY_LIMIT,
            benign_error_codes: HashSet::new(),
        }
    }

    /// Builds a config from `WORKFLOW_STREAM_*` environment variables.
    ///
    /// - `WORKFLOW_STREAM_URL` (required)
    /// - `WORKFLOW_STREAM_TOKEN`
    /// - `WORKFLOW_STREAM_IDLE_TIMEOUT_SECS` (`0` disables the idle timeout)
    /// - `WORKFLOW_STREAM_HISTORY_LIMIT`
    /// - `WORKFLOW_STREAM_BENIGN_ERROR_CODES` (comma-separated)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], with `endpoint_url` taking precedence over
    /// `WORKFLOW_STREAM_URL` when given.
    pub fn from_env_with_endpoint(endpoint_url: Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match (key, &endpoint_url) {
            (ENV_URL, Some(url)) => Some(url.clone()),
            _ => std::env::var(key).ok(),
        })
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let url = lookup(ENV_URL).unwrap_or_default();
        if url.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_URL));
        }
        let mut config = Self::new(url.trim());
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.trim().is_empty()) {
            config.bearer_token = Some(token.trim().to_string());
        }
        if let Some(raw) = lookup(ENV_IDLE_TIMEOUT) {
            let secs = parse_number(ENV_IDLE_TIMEOUT, &raw)?;
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = lookup(ENV_HISTORY_LIMIT) {
            config.history_limit = parse_number(ENV_HISTORY_LIMIT, &raw)? as usize;
        }
        if let Some(raw) = lookup(ENV_BENIGN_CODES) {
            config.benign_error_codes = raw
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn benign_error_code(mut self, code: impl Into<String>) -> Self {
        self.benign_error_codes.insert(code.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_URL));
        }
        if !self.endpoint_url.starts_with("http://") && !self.endpoint_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: ENV_URL,
                message: format!("expected an http(s) URL, got {}", self.endpoint_url),
            });
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_HISTORY_LIMIT,
                message: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        message: format!("{raw:?}: {e}"),
    })
}
