//! Hand-off of jobs to the external training executor.
//!
//! The queue behind a `Dispatcher` is at-least-once; the executor treats a
//! repeated job id as the same job. Adapters here only enqueue.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finetune_training::FineTuneId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

/// Errors raised while enqueuing a job.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The consuming side of the queue is gone.
    #[error("Work queue is closed")]
    Closed,

    /// Writing to the spool failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Interface to the work queue consumed by the training executor.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Enqueues one job for training.
    async fn enqueue(&self, fine_tune_id: &FineTuneId) -> Result<(), DispatchError>;
}

/// Message delivered through a `ChannelDispatcher`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub fine_tune_id: FineTuneId,
    pub enqueued_at: DateTime<Utc>,
}

impl DispatchRecord {
    fn now(fine_tune_id: &FineTuneId) -> Self {
        Self { fine_tune_id: fine_tune_id.clone(), enqueued_at: Utc::now() }
    }
}

/// In-process queue backed by a tokio unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<DispatchRecord>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher and the receiver an executor loop reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn enqueue(&self, fine_tune_id: &FineTuneId) -> Result<(), DispatchError> {
        self.sender.send(DispatchRecord::now(fine_tune_id)).map_err(|_| DispatchError::Closed)?;
        debug!(fine_tune_id = %fine_tune_id, "Sent fine tune to channel");
        Ok(())
    }
}

/// Appends one JSON line per job to a spool file read by the executor.
#[derive(Debug)]
pub struct SpoolDispatcher {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SpoolDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Dispatcher for SpoolDispatcher {
    async fn enqueue(&self, fine_tune_id: &FineTuneId) -> Result<(), DispatchError> {
        let mut line = serde_json::to_string(&DispatchRecord::now(fine_tune_id))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(fine_tune_id = %fine_tune_id, path = %self.path.display(), "Spooled fine tune");
        Ok(())
    }
}

/// Logs the hand-off and always succeeds. For local runs without an executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn enqueue(&self, fine_tune_id: &FineTuneId) -> Result<(), DispatchError> {
        info!(fine_tune_id = %fine_tune_id, "Fine tune ready for training");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_channel_dispatcher_delivers() {
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let id = FineTuneId::from("ft-1");

        dispatcher.enqueue(&id).await.unwrap();

        let record = receiver.recv().await.unwrap();
        assert_eq!(record.fine_tune_id, id);
    }

    #[tokio::test]
    async fn test_channel_dispatcher_closed_receiver() {
        let (dispatcher, receiver) = ChannelDispatcher::new();
        drop(receiver);

        let result = dispatcher.enqueue(&FineTuneId::from("ft-1")).await;
        assert!(matches!(result, Err(DispatchError::Closed)));
    }

    #[tokio::test]
    async fn test_spool_dispatcher_appends_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dispatch.jsonl");
        let dispatcher = SpoolDispatcher::new(&path);

        dispatcher.enqueue(&FineTuneId::from("ft-1")).await.unwrap();
        dispatcher.enqueue(&FineTuneId::from("ft-2")).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<DispatchRecord> =
            contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fine_tune_id.as_str(), "ft-1");
        assert_eq!(records[1].fine_tune_id.as_str(), "ft-2");
    }

    #[tokio::test]
    async fn test_spool_dispatcher_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dispatcher = SpoolDispatcher::new(temp_dir.path().join("missing").join("spool.jsonl"));

        let result = dispatcher.enqueue(&FineTuneId::from("ft-1")).await;
        assert!(matches!(result, Err(DispatchError::Io(_))));
    }
}
