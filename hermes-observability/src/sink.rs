use hermes_core::LogEntry;
use tracing::info;

/// Receives every finished call entry exactly once.
///
/// Implementations must not block the calling task for long; anything slow
/// belongs on a background task.
pub trait LogSink: Send + Sync {
    fn record(&self, entry: LogEntry);
}

/// Emits each entry as a single structured `info` event on the
/// `hermes::calls` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, entry: LogEntry) {
        info!(
            target: "hermes::calls",
            date = %entry.date.to_rfc3339(),
            remote_host = %entry.remote_host,
            remote_application = entry.remote_application.as_deref().unwrap_or(""),
            request_client_version = entry.request_client_version.as_deref().unwrap_or(""),
            client_version = %entry.client_version,
            request_url = %entry.request_url,
            application_url = %entry.application_url,
            cached = entry.cached,
            duration_ms = entry.duration_ms,
            response_status = entry.response_status.as_deref().unwrap_or(""),
            error_message = entry.error_message.as_deref().unwrap_or(""),
            "call"
        );
    }
}

impl<S: LogSink + ?Sized> LogSink for std::sync::Arc<S> {
    fn record(&self, entry: LogEntry) {
        (**self).record(entry);
    }
}
