use hermes_core::config::{LogSinkConfig, LogSinkKind};
use hermes_observability::{FileSink, LogSink, TracingSink};
use std::io;
use std::sync::Arc;
use tracing::{info, warn};

/// The call log sink selected in configuration, plus the file writer behind
/// it when there is one so it can be drained at shutdown.
pub struct CallLog {
    sink: Arc<dyn LogSink>,
    file: Option<Arc<FileSink>>,
}

impl CallLog {
    /// A file sink needs a running tokio runtime.
    pub fn from_config(config: &LogSinkConfig) -> io::Result<Self> {
        match config.kind {
            LogSinkKind::Tracing => Ok(Self {
                sink: Arc::new(TracingSink),
                file: None,
            }),
            LogSinkKind::File => {
                let file = Arc::new(FileSink::spawn(&config.file_path, config.channel_capacity)?);
                Ok(Self {
                    sink: Arc::clone(&file) as Arc<dyn LogSink>,
                    file: Some(file),
                })
            }
        }
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    /// Write out every queued entry. Call after the router and every other
    /// handle from [`CallLog::sink`] are dropped.
    pub async fn close(self) {
        let Self { sink, file } = self;
        drop(sink);
        let Some(file) = file else {
            return;
        };
        match Arc::try_unwrap(file) {
            Ok(file) => {
                let path = file.path().display().to_string();
                let dropped = file.dropped();
                file.close().await;
                info!(path = %path, dropped, "Call log closed");
            }
            Err(file) => warn!(
                path = %file.path().display(),
                handles = Arc::strong_count(&file) - 1,
                "Call log still in use at shutdown, queued entries may be lost"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::LogEntry;

    fn file_config(dir: &tempfile::TempDir, capacity: usize) -> LogSinkConfig {
        LogSinkConfig {
            kind: LogSinkKind::File,
            file_path: dir.path().join("calls.log"),
            channel_capacity: capacity,
        }
    }

    #[tokio::test]
    async fn tracing_sink_closes_without_file() {
        let log = CallLog::from_config(&LogSinkConfig::default()).unwrap();
        assert!(log.file.is_none());
        log.close().await;
    }

    #[tokio::test]
    async fn file_sink_creates_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, 4);
        let log = CallLog::from_config(&config).unwrap();
        assert!(config.file_path.exists());
        log.close().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_drains_queued_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, 64);
        let log = CallLog::from_config(&config).unwrap();

        // The writer task cannot run before `close` yields on this runtime,
        // so every line is still queued here.
        let sink = log.sink();
        for i in 0..50 {
            sink.record(LogEntry::new(format!("http://svc/items/{i}")));
        }
        drop(sink);
        log.close().await;

        let written = std::fs::read_to_string(&config.file_path).unwrap();
        assert_eq!(written.lines().count(), 50);
        assert!(written.lines().last().unwrap().contains("items/49"));
    }

    #[tokio::test]
    async fn close_with_live_handle_returns() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::from_config(&file_config(&dir, 4)).unwrap();
        let held = log.sink();
        log.close().await;
        held.record(LogEntry::new("http://svc/late"));
    }
}
