//! Run-scoped structured logging
//!
//! A [`RunLog`] is created for one pipeline run and passed explicitly to
//! every stage. Entries are forwarded to the `log` facade, appended to a
//! local NDJSON file, and kept in memory so they can be mirrored to the blob
//! store when the run ends. None of these sinks can fail the run.

use crate::storage::BlobStore;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One structured log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub level: String,
    pub message: String,
}

/// Blob destination for mirrored entries
struct Mirror {
    store: Arc<dyn BlobStore>,
    path: String,
}

pub struct RunLog {
    run_id: String,
    started_at: DateTime<Utc>,
    local_path: Option<PathBuf>,
    mirror: Option<Mirror>,
    entries: Mutex<Vec<LogEntry>>,
    local_failed: AtomicBool,
}

impl RunLog {
    /// Create a log context for a run with no local file and no mirror
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            local_path: None,
            mirror: None,
            entries: Mutex::new(Vec::new()),
            local_failed: AtomicBool::new(false),
        }
    }

    /// Append every entry as a JSON line to `path`
    ///
    /// The parent directory is created on a best-effort basis.
    pub fn with_local_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            log::warn!("Cannot create log directory {}: {}", parent.display(), e);
        }
        self.local_path = Some(path);
        self
    }

    /// Mirror all entries to `path` in `store` when the run is flushed
    pub fn with_mirror(mut self, store: Arc<dyn BlobStore>, path: impl Into<String>) -> Self {
        self.mirror = Some(Mirror {
            store,
            path: path.into(),
        });
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn info(&self, stage: &str, message: impl Into<String>) {
        self.record(log::Level::Info, stage, message);
    }

    pub fn warn(&self, stage: &str, message: impl Into<String>) {
        self.record(log::Level::Warn, stage, message);
    }

    pub fn error(&self, stage: &str, message: impl Into<String>) {
        self.record(log::Level::Error, stage, message);
    }

    /// Record one entry in every sink
    pub fn record(&self, level: log::Level, stage: &str, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            level: level.as_str().to_string(),
            message: message.into(),
        };

        log::log!(level, "[{}] {}", entry.stage, entry.message);
        self.append_local(&entry);

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    /// Snapshot of the entries recorded so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn append_local(&self, entry: &LogEntry) {
        let Some(path) = &self.local_path else {
            return;
        };

        let result = serde_json::to_string(entry)
            .map_err(std::io::Error::other)
            .and_then(|line| {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                writeln!(file, "{}", line)
            });

        // Warn once; a broken log file must not flood the console
        if let Err(e) = result
            && !self.local_failed.swap(true, Ordering::Relaxed)
        {
            log::warn!("Cannot append to run log {}: {}", path.display(), e);
        }
    }

    /// Mirror the recorded entries to the blob store, if configured
    ///
    /// Returns whether a mirror was written. Failures are logged and swallowed.
    pub async fn flush(&self) -> bool {
        let Some(mirror) = &self.mirror else {
            return false;
        };

        let body = self
            .entries()
            .iter()
            .filter_map(|entry| serde_json::to_string(entry).ok())
            .map(|line| format!("{}\n", line))
            .collect::<String>();

        match mirror.store.put(&mirror.path, Bytes::from(body)).await {
            Ok(()) => {
                log::debug!("Mirrored run log to {}", mirror.path);
                true
            }
            Err(e) => {
                log::warn!("Failed to mirror run log to {}: {}", mirror.path, e);
                false
            }
        }
    }
}
