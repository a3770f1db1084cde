//! reqwest-based delivery transport.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use tracing::debug;

use crate::domain::{DeliveryResponse, TransportError};
use crate::ports::{DeliveryRequest, DeliveryTransport};

pub const ACTIVITY_CONTENT_TYPE: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Response bodies beyond this are dropped.
    pub max_response_bytes: usize,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(100),
            max_response_bytes: 1024 * 1024,
            user_agent: concat!("herald/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpTransport {
    client: Client,
    max_response_bytes: usize,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Other(format!("http client: {e}")))?;
        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// Reads the body up to the cap. An oversized body is dropped; the
    /// status still stands.
    async fn read_capped(
        &self,
        mut response: reqwest::Response,
    ) -> Result<Option<String>, TransportError> {
        if let Some(len) = response.content_length()
            && len > self.max_response_bytes as u64
        {
            debug!(len, limit = self.max_response_bytes, "response body dropped");
            return Ok(None);
        }

        let mut body = CappedBody::new(self.max_response_bytes);
        while let Some(chunk) = response.chunk().await.map_err(classify_reqwest)? {
            if !body.push(&chunk) {
                debug!(limit = self.max_response_bytes, "response body dropped");
                break;
            }
        }
        Ok(body.finish())
    }
}

/// Accumulates a response body until it would pass `limit`.
struct CappedBody {
    limit: usize,
    bytes: Vec<u8>,
    overflowed: bool,
}

impl CappedBody {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            bytes: Vec::new(),
            overflowed: false,
        }
    }

    /// Returns false once the body is over the limit.
    fn push(&mut self, chunk: &[u8]) -> bool {
        if self.overflowed || self.bytes.len() + chunk.len() > self.limit {
            self.overflowed = true;
            self.bytes.clear();
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    fn finish(self) -> Option<String> {
        if self.overflowed || self.bytes.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.bytes).into_owned())
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        let mut builder = self
            .client
            .post(request.inbox.as_str())
            .header(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("header value: {e}")))?;
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let body = self.read_capped(response).await?;

        debug!(inbox = %request.inbox, status, "delivery response");
        Ok(DeliveryResponse { status, body })
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout;
    }
    if e.is_connect() {
        let detail = source_chain(&e);
        if detail.contains("dns error") || detail.contains("failed to lookup address") {
            return TransportError::Dns(detail);
        }
        return TransportError::Connect(detail);
    }
    if e.is_decode() || e.is_body() {
        return TransportError::Malformed(source_chain(&e));
    }
    if e.is_builder() {
        return TransportError::Malformed(e.to_string());
    }
    TransportError::Other(source_chain(&e))
}

fn source_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}
