use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt as _};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::errors::StreamError;

/// Response body as a stream of raw chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// One outbound streaming request.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundRequest {
    pub endpoint: String,
    /// Custom headers. `Content-Type` is always `application/json` and cannot
    /// be overridden here.
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// Opens the response body for a request.
///
/// Implementations return `Err` for anything that prevents streaming from
/// starting, including non-success status codes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: OutboundRequest) -> Result<ByteStream, StreamError>;
}

/// `Transport` backed by a `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StreamError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: OutboundRequest) -> Result<ByteStream, StreamError> {
        debug!(endpoint = %request.endpoint, headers = request.headers.len(), "opening stream");
        let mut http_req = self.client.post(&request.endpoint);
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                continue;
            }
            http_req = http_req.header(name.as_str(), value.as_str());
        }
        let body = serde_json::to_vec(&request.body)
            .map_err(|e| StreamError::protocol(format!("failed to encode request body: {e}")))?;
        let response = http_req
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::status(status.as_u16(), body));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(stream))
    }
}
