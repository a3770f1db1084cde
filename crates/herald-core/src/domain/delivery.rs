//! Delivery model: inbox endpoints, transport results and their classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A recipient endpoint's delivery URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inbox(String);

impl Inbox {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme + host + port of the inbox, if it parses as a URL.
    pub fn origin(&self) -> Option<String> {
        origin_of(&self.0)
    }
}

impl fmt::Display for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Inbox {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Inbox {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scheme + host + port of `uri`, or `None` when it is not an absolute URL.
pub fn origin_of(uri: &str) -> Option<String> {
    let parsed = url::Url::parse(uri).ok()?;
    match parsed.origin() {
        url::Origin::Tuple(..) => Some(parsed.origin().ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// What came back from one outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl DeliveryResponse {
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A request that never produced a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

/// How one endpoint fared in one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,

    /// Worth trying again later.
    Retryable,

    /// Abandoned for this cycle.
    Terminal,
}

impl DeliveryOutcome {
    /// Request timeout, rate limiting and 5xx are retryable; a transport
    /// timeout counts as a request timeout. Everything else that is not a
    /// 2xx is terminal, DNS failures and malformed responses included.
    pub fn classify(result: &Result<DeliveryResponse, TransportError>) -> Self {
        match result {
            Ok(response) if response.is_success() => DeliveryOutcome::Delivered,
            Ok(response) => Self::from_status(response.status),
            Err(TransportError::Timeout) => DeliveryOutcome::Retryable,
            Err(_) => DeliveryOutcome::Terminal,
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => DeliveryOutcome::Delivered,
            408 | 429 | 500..=599 => DeliveryOutcome::Retryable,
            _ => DeliveryOutcome::Terminal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Retryable => "retryable",
            DeliveryOutcome::Terminal => "terminal",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::ok(200, DeliveryOutcome::Delivered)]
    #[case::accepted(202, DeliveryOutcome::Delivered)]
    #[case::request_timeout(408, DeliveryOutcome::Retryable)]
    #[case::rate_limited(429, DeliveryOutcome::Retryable)]
    #[case::internal(500, DeliveryOutcome::Retryable)]
    #[case::unavailable(503, DeliveryOutcome::Retryable)]
    #[case::gateway_timeout(504, DeliveryOutcome::Retryable)]
    #[case::bad_request(400, DeliveryOutcome::Terminal)]
    #[case::unauthorized(401, DeliveryOutcome::Terminal)]
    #[case::gone(410, DeliveryOutcome::Terminal)]
    #[case::redirect(301, DeliveryOutcome::Terminal)]
    fn status_classification(#[case] status: u16, #[case] expected: DeliveryOutcome) {
        let result = Ok(DeliveryResponse::new(status));
        assert_eq!(DeliveryOutcome::classify(&result), expected);
    }

    #[rstest]
    #[case::timeout(TransportError::Timeout, DeliveryOutcome::Retryable)]
    #[case::dns(TransportError::Dns("nx".into()), DeliveryOutcome::Terminal)]
    #[case::connect(TransportError::Connect("refused".into()), DeliveryOutcome::Terminal)]
    #[case::malformed(TransportError::Malformed("bad".into()), DeliveryOutcome::Terminal)]
    fn transport_error_classification(
        #[case] error: TransportError,
        #[case] expected: DeliveryOutcome,
    ) {
        assert_eq!(DeliveryOutcome::classify(&Err(error)), expected);
    }

    #[test]
    fn inbox_origin_strips_path() {
        let inbox = Inbox::new("https://remote.example:8443/users/a/inbox");
        assert_eq!(inbox.origin().as_deref(), Some("https://remote.example:8443"));
        assert_eq!(Inbox::new("not a url").origin(), None);
    }
}
