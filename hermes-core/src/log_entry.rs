//! Per-call audit record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// One relayed call, written once per pipeline invocation.
///
/// Created by `begin`, filled in while the call progresses, then moved into
/// the log sink by `end`. There is no `Clone`: a finished entry has exactly
/// one owner.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    /// Wall-clock creation time (UTC).
    pub date: DateTime<Utc>,
    /// Monotonic creation instant; duration is measured from here.
    #[serde(skip)]
    started: Instant,

    // ── Caller ───────────────────────────────────────────────────
    pub remote_host: String,
    /// Application name resolved from `remote_host`, when known.
    pub remote_application: Option<String>,
    /// Client version header sent by the caller, if any.
    pub request_client_version: Option<String>,
    /// Client version of this gateway.
    pub client_version: String,

    // ── Call ─────────────────────────────────────────────────────
    /// Path as seen by the gateway.
    pub request_url: String,
    /// Downstream target URL (template form).
    pub application_url: String,
    pub cached: bool,

    // ── Outcome ──────────────────────────────────────────────────
    pub duration_ms: u64,
    /// HTTP status string on success, status or failure kind on failure.
    pub response_status: Option<String>,
    pub error_message: Option<String>,
}

impl LogEntry {
    /// Create an entry for a call to `application_url`; fill remaining fields
    /// before handing it off.
    pub fn new(application_url: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            started: Instant::now(),
            remote_host: String::new(),
            remote_application: None,
            request_client_version: None,
            client_version: String::new(),
            request_url: String::new(),
            application_url: application_url.into(),
            cached: false,
            duration_ms: 0,
            response_status: None,
            error_message: None,
        }
    }

    /// Resolved application name, or the raw host when unknown.
    pub fn caller(&self) -> &str {
        self.remote_application.as_deref().unwrap_or(&self.remote_host)
    }

    /// Record elapsed milliseconds since creation and return them.
    pub fn stop_clock(&mut self) -> u64 {
        self.duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.duration_ms
    }

    /// Serialise to a compact JSON line suitable for log shipping.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
