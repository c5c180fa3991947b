//! JSON-lines call log written by a background task.
//!
//! `record` serialises the entry and hands the line to a bounded channel with
//! `try_send`, so a slow disk never stalls a request. When the channel is full
//! the line is dropped and counted.

use crate::sink::LogSink;
use hermes_core::LogEntry;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct FileSink {
    path: PathBuf,
    sender: mpsc::Sender<String>,
    writer: JoinHandle<()>,
    dropped: AtomicU64,
}

impl FileSink {
    /// Open (or create) `path` for appending and start the writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(path: impl AsRef<Path>, capacity: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let handle = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = handle.spawn(write_loop(tokio::fs::File::from_std(file), path.clone(), rx));

        info!(path = %path.display(), capacity, "Call log file opened");
        Ok(Self {
            path,
            sender: tx,
            writer,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines discarded because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting entries and wait until every queued line is written.
    pub async fn close(self) {
        let Self { sender, writer, .. } = self;
        drop(sender);
        if let Err(e) = writer.await {
            error!(error = %e, "Call log writer task failed");
        }
    }
}

impl LogSink for FileSink {
    fn record(&self, entry: LogEntry) {
        match self.sender.try_send(entry.to_json_line()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(path = %self.path.display(), dropped, "Call log channel full, entry dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(path = %self.path.display(), "Call log writer stopped, entry dropped");
            }
        }
    }
}

async fn write_loop(mut file: tokio::fs::File, path: PathBuf, mut rx: mpsc::Receiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = file.write_all(line.as_bytes()).await {
            error!(path = %path.display(), error = %e, "Call log write failed");
            continue;
        }
        if let Err(e) = file.flush().await {
            error!(path = %path.display(), error = %e, "Call log flush failed");
        }
    }
}
