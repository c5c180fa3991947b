//! Uniform response shape returned by the proxy pipeline, and the single
//! failure type downstream callers report.

use http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Header carrying an escaped error message on failure responses. A hop that
/// receives it relays the value instead of its own transport error text.
pub const ERROR_MESSAGE_HEADER: &str = "x-hermes-error-message";

/// Header carrying the caller's client version.
pub const CLIENT_VERSION_HEADER: &str = "x-hermes-client-version";

/// Opaque discriminator for the shape of a response payload.
///
/// Two calls to the same URL expecting different payload kinds never share a
/// cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadKind(String);

impl PayloadKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Kind used for calls that expect no body.
    pub fn empty() -> Self {
        Self("empty".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PayloadKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// Status, payload and headers of a relayed call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: StatusCode,
    pub payload: Option<Value>,
    pub headers: HeaderMap,
}

impl ResponseEnvelope {
    pub fn new(status: StatusCode, payload: Option<Value>, headers: HeaderMap) -> Self {
        Self { status, payload, headers }
    }

    /// `200 OK` with the given payload and no headers.
    pub fn ok(payload: Value) -> Self {
        Self::new(StatusCode::OK, Some(payload), HeaderMap::new())
    }

    /// Failure shape: status from the failure (500 when it has none), no body,
    /// and the escaped message in [`ERROR_MESSAGE_HEADER`].
    pub fn failure(failure: &DownstreamFailure) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(value) = header_value(&escape_message(&failure.error_message())) {
            headers.insert(ERROR_MESSAGE_HEADER, value);
        }
        Self::new(failure.envelope_status(), None, headers)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The relayed error message, if this envelope carries one.
    pub fn error_message(&self) -> Option<Cow<'_, str>> {
        self.headers.get(ERROR_MESSAGE_HEADER).map(header_text)
    }
}

/// Why a downstream call did not produce a success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Downstream answered with a non-2xx status.
    Status,
    Connect,
    Timeout,
    /// Response arrived but the body could not be read or parsed.
    Decode,
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Status => "StatusError",
            FailureKind::Connect => "ConnectError",
            FailureKind::Timeout => "TimeoutError",
            FailureKind::Decode => "DecodeError",
            FailureKind::Transport => "TransportError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downstream call that did not complete successfully.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DownstreamFailure {
    pub kind: FailureKind,
    /// Present when downstream answered with an HTTP status.
    pub status: Option<StatusCode>,
    pub message: String,
    /// Response headers, when downstream answered at all.
    pub headers: Option<HeaderMap>,
}

impl DownstreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            headers: None,
        }
    }

    /// Downstream answered with `status`.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Status,
            status: Some(status),
            message: message.into(),
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Status for the failure envelope.
    pub fn envelope_status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Status as recorded in the call log: the HTTP status when there is one,
    /// otherwise the failure kind name.
    pub fn status_label(&self) -> String {
        match self.status {
            Some(status) => status.to_string(),
            None => self.kind.as_str().to_string(),
        }
    }

    /// Message relayed from a further hop via [`ERROR_MESSAGE_HEADER`] when
    /// present, otherwise this failure's own message.
    pub fn error_message(&self) -> String {
        self.headers
            .as_ref()
            .and_then(|h| h.get(ERROR_MESSAGE_HEADER))
            .map(|v| header_text(v).into_owned())
            .unwrap_or_else(|| self.message.clone())
    }
}

/// Escape line breaks and tabs as two-character sequences so the message
/// fits in a single header line.
pub fn escape_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Header text as UTF-8. Bytes outside visible ASCII are legal in a header
/// value, so they are decoded rather than rejected.
pub fn header_text(value: &HeaderValue) -> Cow<'_, str> {
    String::from_utf8_lossy(value.as_bytes())
}

fn header_value(text: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(text).ok().or_else(|| {
        let cleaned: String = text.chars().filter(|c| !c.is_control()).collect();
        HeaderValue::from_str(&cleaned).ok()
    })
}
