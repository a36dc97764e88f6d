//! Durable failure queue.
//!
//! Messages that exhaust their dispatch retries are appended to a
//! single JSON-lines log file (`queue.jsonl`) inside the configured
//! queue directory. The log is append-only: replay reads it without
//! consuming records, so a replayed message may be delivered more than
//! once. That is the intended at-least-once contract; replay is an
//! operator-triggered tool, not an automatic retry loop.

mod error;
mod record;

use std::path::{Path, PathBuf};

use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};
use tracing::warn;

pub use crate::{
    error::{QueueError, Result},
    record::QueueRecord,
};

const QUEUE_FILE: &str = "queue.jsonl";

/// Outcome of a [`FailureQueue::replay`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records handed to the send function.
    pub replayed: usize,
    /// Records the send function reported as accepted.
    pub delivered: usize,
    /// Malformed lines skipped (logged, never silently dropped).
    pub skipped: usize,
}

/// Append-only failure queue rooted at a directory.
#[derive(Debug)]
pub struct FailureQueue {
    path: PathBuf,
    // Serialises appends so each record lands as one complete line even
    // with many sessions failing concurrently.
    append_lock: Mutex<()>,
}

impl FailureQueue {
    /// Open (and if necessary create) the queue directory.
    ///
    /// # Errors
    /// If the directory cannot be created, or the path exists but is
    /// not a directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let path = dir.into();

        if path.try_exists()? {
            if !path.is_dir() {
                return Err(QueueError::NotDirectory(path.display().to_string()));
            }
        } else {
            std::fs::create_dir_all(&path)?;
        }

        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    /// Path of the JSON-lines log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(QUEUE_FILE)
    }

    /// Append one record to the log.
    ///
    /// # Errors
    /// If encoding or the append itself fails. Callers must not swallow
    /// this: a failed persist means the message has no safety net left.
    pub async fn persist(&self, record: &QueueRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay every record through a caller-supplied send function, in
    /// append order.
    ///
    /// Replay bypasses deduplication and rate limiting, and does not
    /// delete or truncate the log. Malformed lines are logged and
    /// skipped so that one corrupt line cannot strand every record
    /// behind it; the skip count is reported back to the operator.
    ///
    /// # Errors
    /// If the log file exists but cannot be read.
    pub async fn replay<F, Fut>(&self, mut send: F) -> Result<ReplayReport>
    where
        F: FnMut(QueueRecord) -> Fut,
        Fut: Future<Output = bool>,
    {
        let log_path = self.log_path();
        let mut report = ReplayReport::default();

        if !log_path.try_exists()? {
            return Ok(report);
        }

        let file = tokio::fs::File::open(&log_path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut line_number = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: QueueRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(line = line_number, error = %err, "Skipping malformed queue record");
                    report.skipped += 1;
                    continue;
                }
            };

            report.replayed += 1;
            if send(record).await {
                report.delivered += 1;
            }
        }

        Ok(report)
    }
}

/// Convenience wrapper matching the original operational entry point:
/// open the directory and replay it in one call.
///
/// # Errors
/// If the directory is invalid or the log cannot be read.
pub async fn replay_queue<F, Fut>(dir: &Path, send: F) -> Result<ReplayReport>
where
    F: FnMut(QueueRecord) -> Fut,
    Fut: Future<Output = bool>,
{
    FailureQueue::open(dir)?.replay(send).await
}
