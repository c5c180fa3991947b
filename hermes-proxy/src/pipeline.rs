//! Per-call pipeline: log entry, cache lookup, downstream call, envelope.
//!
//! Every call runs `begin` → (cache hit | downstream call) → `end` and always
//! yields a [`ResponseEnvelope`]; failures are folded into the envelope rather
//! than returned as errors.

use crate::downstream::{DownstreamCaller, DownstreamRequest};
use hermes_core::{DownstreamFailure, IdentityResolver, LogEntry, PayloadKind, ResponseEnvelope};
use hermes_observability::{LogSink, ProxyMetrics};
use hermes_store::{CacheEntry, CacheKey, ResponseCache};
use http::Method;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, warn};

/// What the gateway knows about the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub remote_host: String,
    /// Path as received by the gateway.
    pub path: String,
    /// Value of the caller's version header, if sent.
    pub client_version: Option<String>,
}

/// Result of comparing the caller's version with the gateway's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Match,
    Missing,
    Mismatch,
}

impl VersionCheck {
    pub fn compare(request: Option<&str>, own: &str) -> Self {
        match request {
            None => VersionCheck::Missing,
            Some(v) if v == own => VersionCheck::Match,
            Some(_) => VersionCheck::Mismatch,
        }
    }
}

/// How a call finished, as seen by `end`.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Response(&'a ResponseEnvelope),
    Failure(&'a DownstreamFailure),
}

pub struct ProxyPipeline {
    cache: ResponseCache,
    downstream: Arc<dyn DownstreamCaller>,
    sink: Arc<dyn LogSink>,
    identity: Arc<IdentityResolver>,
    client_version: String,
    metrics: Option<Arc<ProxyMetrics>>,
}

impl ProxyPipeline {
    pub fn new(
        cache: ResponseCache,
        downstream: Arc<dyn DownstreamCaller>,
        sink: Arc<dyn LogSink>,
        identity: Arc<IdentityResolver>,
        client_version: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            downstream,
            sink,
            identity,
            client_version: client_version.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ProxyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn client_version(&self) -> &str {
        &self.client_version
    }

    /// Start a call: build its log entry and trace the route. Warns when the
    /// caller's version is missing or differs from ours.
    pub fn begin(&self, ctx: &RequestContext, target_url: &str) -> LogEntry {
        let mut entry = LogEntry::new(target_url);
        entry.remote_host = ctx.remote_host.clone();
        entry.remote_application = self.identity.resolve(&ctx.remote_host).map(str::to_string);
        entry.request_client_version = ctx.client_version.clone();
        entry.client_version = self.client_version.clone();
        entry.request_url = ctx.path.clone();

        info!(caller = %entry.caller(), path = %ctx.path, target = %target_url, "Routing call");

        match VersionCheck::compare(ctx.client_version.as_deref(), &self.client_version) {
            VersionCheck::Match => {}
            VersionCheck::Missing => warn!(
                caller = %entry.caller(),
                gateway_version = %self.client_version,
                "Caller sent no client version"
            ),
            VersionCheck::Mismatch => warn!(
                caller = %entry.caller(),
                caller_version = ctx.client_version.as_deref().unwrap_or_default(),
                gateway_version = %self.client_version,
                "Client version mismatch"
            ),
        }
        entry
    }

    /// Relay a GET. With `cacheable`, a fresh cached response is returned
    /// without calling downstream, and successful responses are stored.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        cacheable: bool,
        url: &str,
        payload_kind: &PayloadKind,
        uri_vars: &[String],
    ) -> ResponseEnvelope {
        let mut entry = self.begin(ctx, url);

        let key = cacheable.then(|| CacheKey::new(url, payload_kind.clone(), uri_vars));
        if let Some(ref key) = key
            && let Some(hit) = self.cache.get(key)
        {
            entry.cached = true;
            let response = hit.response().clone();
            self.end(entry, Outcome::Response(&response));
            return response;
        }

        let request = DownstreamRequest {
            method: &Method::GET,
            url,
            payload_kind,
            body: None,
            uri_vars,
        };
        match self.downstream.call(request).await {
            Ok(response) => {
                if let Some(key) = key
                    && response.is_success()
                {
                    self.cache.put(key, CacheEntry::new(response.clone()));
                }
                self.end(entry, Outcome::Response(&response));
                response
            }
            Err(failure) => {
                self.end(entry, Outcome::Failure(&failure));
                ResponseEnvelope::failure(&failure)
            }
        }
    }

    /// Relay a POST. Never cached.
    pub async fn post(
        &self,
        ctx: &RequestContext,
        url: &str,
        body: Option<&Value>,
        payload_kind: &PayloadKind,
        uri_vars: &[String],
    ) -> ResponseEnvelope {
        let entry = self.begin(ctx, url);
        let request = DownstreamRequest {
            method: &Method::POST,
            url,
            payload_kind,
            body,
            uri_vars,
        };
        match self.downstream.call(request).await {
            Ok(response) => {
                self.end(entry, Outcome::Response(&response));
                response
            }
            Err(failure) => {
                self.end(entry, Outcome::Failure(&failure));
                ResponseEnvelope::failure(&failure)
            }
        }
    }

    /// Finish a call: stamp duration and outcome, trace completion, and hand
    /// the entry to the sink.
    pub fn end(&self, mut entry: LogEntry, outcome: Outcome<'_>) {
        let duration_ms = entry.stop_clock();
        let status = match outcome {
            Outcome::Response(response) => {
                entry.response_status = Some(response.status.to_string());
                entry.error_message = response.error_message().map(Cow::into_owned);
                info!(
                    target_url = %entry.application_url,
                    status = %response.status,
                    cached = entry.cached,
                    duration_ms,
                    "{}Call completed",
                    if entry.cached { "[cached] " } else { "" }
                );
                response.status
            }
            Outcome::Failure(failure) => {
                let message = failure.error_message();
                info!(
                    target_url = %entry.application_url,
                    status = %failure.status_label(),
                    error = %message,
                    cached = entry.cached,
                    duration_ms,
                    "Call failed"
                );
                entry.response_status = Some(failure.status_label());
                entry.error_message = Some(message);
                if let Some(ref metrics) = self.metrics {
                    metrics.record_failure(&entry.application_url, failure.kind.as_str());
                }
                failure.envelope_status()
            }
        };

        if let Some(ref metrics) = self.metrics {
            metrics.record_call(
                &entry.application_url,
                status.as_u16(),
                entry.cached,
                duration_ms as f64 / 1000.0,
            );
        }
        self.sink.record(entry);
    }
}
