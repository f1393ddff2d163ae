//! Freezing a dataset's training entries into a job.

use chrono::{DateTime, Utc};
use finetune_training::{DatasetSplit, FineTuneId};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::storage::{StorageResult, format_timestamp};

/// Copies the dataset entries eligible for training into a job's snapshot.
///
/// Must run on the same transaction as the job header insert.
pub struct SnapshotBuilder<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Links every train-split, non-outdated entry of `dataset_id` to the job
    /// and returns how many were linked. Zero is a valid result here.
    pub fn build(
        &self,
        dataset_id: &str,
        fine_tune_id: &FineTuneId,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let inserted = self.conn.execute(
            r#"
            INSERT INTO fine_tune_training_entries (id, fine_tune_id, dataset_entry_id, created_at)
            SELECT lower(hex(randomblob(16))), ?2, de.id, ?3
            FROM dataset_entries de
            WHERE de.dataset_id = ?1 AND de.split = ?4 AND de.outdated = 0
            ORDER BY de.created_at, de.rowid
            "#,
            params![
                dataset_id,
                fine_tune_id.as_str(),
                format_timestamp(now),
                DatasetSplit::Train.as_str()
            ],
        )?;
        debug!(fine_tune_id = %fine_tune_id, dataset_id = %dataset_id, entries = inserted, "Built training snapshot");
        Ok(inserted as u64)
    }
}
