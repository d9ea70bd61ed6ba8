use futures::StreamExt as _;
use tracing::debug;

use crate::config::StreamClientConfig;
use crate::errors::{ConfigError, TransportError};
use crate::framer::ByteStream;
use crate::request::WorkflowRequest;

/// Opens the streaming response for one workflow request.
#[async_trait::async_trait]
pub trait WorkflowTransport: Send + Sync {
    /// Sends the request and returns the response body once the endpoint has
    /// accepted it. Non-success statuses are errors, not empty streams.
    async fn open(&self, request: &WorkflowRequest) -> Result<ByteStream, TransportError>;
}

/// `reqwest`-backed transport posting JSON to the workflow endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint_url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &StreamClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "http_client",
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl WorkflowTransport for HttpTransport {
    async fn open(&self, request: &WorkflowRequest) -> Result<ByteStream, TransportError> {
        debug!(url = %self.endpoint_url, candidates = request.candidates.len(), "opening workflow stream");
        let mut http_req = self
            .client
            .post(&self.endpoint_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        if let Some(token) = &self.bearer_token {
            http_req = http_req.bearer_auth(token);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if response.content_length() == Some(0) {
            return Err(TransportError::MissingBody);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(body))
    }
}
