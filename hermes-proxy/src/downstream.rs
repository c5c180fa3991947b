use async_trait::async_trait;
use hermes_core::config::ClientConfig;
use hermes_core::envelope::CLIENT_VERSION_HEADER;
use hermes_core::uri::expand_uri;
use hermes_core::{DownstreamFailure, FailureKind, PayloadKind, ResponseEnvelope};
use http::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, Method};
use serde_json::Value;

/// One call to forward. `url` is the template form; `uri_vars` fill its
/// placeholders in order.
#[derive(Debug, Clone, Copy)]
pub struct DownstreamRequest<'a> {
    pub method: &'a Method,
    pub url: &'a str,
    pub payload_kind: &'a PayloadKind,
    pub body: Option<&'a Value>,
    pub uri_vars: &'a [String],
}

/// Transport seam: performs the network call for the pipeline.
#[async_trait]
pub trait DownstreamCaller: Send + Sync {
    async fn call(&self, request: DownstreamRequest<'_>) -> Result<ResponseEnvelope, DownstreamFailure>;
}

/// `reqwest`-backed caller speaking JSON.
pub struct HttpDownstream {
    client: reqwest::Client,
    client_version: String,
}

impl HttpDownstream {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.connect_timeout() + config.read_timeout())
            .build()?;
        Ok(Self {
            client,
            client_version: config.version.clone(),
        })
    }
}

#[async_trait]
impl DownstreamCaller for HttpDownstream {
    async fn call(&self, request: DownstreamRequest<'_>) -> Result<ResponseEnvelope, DownstreamFailure> {
        let url = expand_uri(request.url, request.uri_vars);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(CLIENT_VERSION_HEADER, &self.client_version);
        if let Some(body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_failure)?;
        let status = response.status();
        let headers = relayable(response.headers());
        let body = response.bytes().await.map_err(transport_failure)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let message = match text.trim() {
                "" => status.canonical_reason().unwrap_or("error").to_string(),
                t => t.to_string(),
            };
            return Err(DownstreamFailure::from_status(status, message).with_headers(headers));
        }

        let payload = if body.is_empty() {
            None
        } else {
            let value = serde_json::from_slice(&body).map_err(|e| {
                DownstreamFailure::new(FailureKind::Decode, e.to_string()).with_headers(headers.clone())
            })?;
            Some(value)
        };
        Ok(ResponseEnvelope::new(status, payload, headers))
    }
}

fn transport_failure(e: reqwest::Error) -> DownstreamFailure {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_connect() {
        FailureKind::Connect
    } else if e.is_decode() || e.is_body() {
        FailureKind::Decode
    } else {
        FailureKind::Transport
    };
    let failure = DownstreamFailure::new(kind, e.to_string());
    match e.status() {
        Some(status) => DownstreamFailure { status: Some(status), ..failure },
        None => failure,
    }
}

/// Response headers minus framing headers; the gateway re-encodes the body.
fn relayable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in [CONTENT_LENGTH, CONTENT_TYPE, CONTENT_ENCODING, TRANSFER_ENCODING, CONNECTION] {
        out.remove(name);
    }
    out
}
