//! Repository implementations for data persistence.
//!
//! Repositories borrow a `rusqlite::Connection`. A `rusqlite::Transaction`
//! derefs to a connection, so the same repository runs either on its own or
//! as one step of a larger transaction.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use finetune_training::{
    BaseModel, DatasetSplit, DispatchState, FineTuneId, FineTuneStatus,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Dataset, DatasetEntry, DeletedFineTune, DispatchOutcome, FineTune, FineTuneSummary,
    PruningRule, PruningRuleMatch, RuleOwner,
};
use crate::storage::database::format_timestamp;
use crate::storage::error::{StorageError, StorageResult};

// ============================================================================
// Row Parsing Helpers
// ============================================================================

fn invalid_column(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), rusqlite::types::Type::Text)
}

/// Parses an RFC3339 timestamp string from a row into a `DateTime<Utc>`.
fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let timestamp_str: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid_column(idx, column_name))
}

fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let timestamp_str: Option<String> = row.get(idx)?;
    timestamp_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid_column(idx, column_name))
        })
        .transpose()
}

/// Parses a text column holding one of the stored enum values.
fn parse_enum_field<T: FromStr>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    value.parse().map_err(|_| invalid_column(idx, column_name))
}

fn parse_count(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let count: i64 = row.get(idx)?;
    Ok(count.max(0) as u64)
}

fn not_found_error(entity: &str, id: &str) -> StorageError {
    StorageError::NotFound(format!("{entity} with id {id} not found"))
}

fn new_row_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository trait for the dataset side: datasets, entries and live pruning rules.
pub trait DatasetRepository {
    /// Creates a dataset in a project.
    fn create_dataset(&self, project_id: &str, name: &str) -> StorageResult<Dataset>;

    /// Retrieves a dataset by ID.
    fn get_dataset(&self, id: &str) -> StorageResult<Dataset>;

    /// Adds an entry to a dataset.
    fn add_entry(&self, dataset_id: &str, split: DatasetSplit) -> StorageResult<DatasetEntry>;

    /// Retrieves a dataset entry by ID.
    fn get_entry(&self, id: &str) -> StorageResult<DatasetEntry>;

    /// Lists every entry of a dataset, oldest first.
    fn list_entries(&self, dataset_id: &str) -> StorageResult<Vec<DatasetEntry>>;

    /// Flags or unflags an entry as superseded.
    fn set_outdated(&self, entry_id: &str, outdated: bool) -> StorageResult<()>;

    /// Moves an entry to another split.
    fn set_split(&self, entry_id: &str, split: DatasetSplit) -> StorageResult<()>;

    /// Adds a pruning rule to a dataset.
    fn add_pruning_rule(
        &self,
        dataset_id: &str,
        text_to_match: &str,
        tokens_in_text: u32,
    ) -> StorageResult<PruningRule>;

    /// Edits a dataset pruning rule in place.
    fn update_pruning_rule(
        &self,
        rule_id: &str,
        text_to_match: &str,
        tokens_in_text: u32,
    ) -> StorageResult<()>;

    /// Deletes a dataset pruning rule and its matches.
    ///
    /// Rules replicated into a fine tune are not reachable through this call.
    fn delete_pruning_rule(&self, rule_id: &str) -> StorageResult<()>;

    /// Records that a dataset rule matched an entry of the same dataset.
    fn add_rule_match(&self, rule_id: &str, dataset_entry_id: &str)
    -> StorageResult<PruningRuleMatch>;

    /// Lists the dataset's live pruning rules with their matches.
    fn pruning_rules(&self, dataset_id: &str) -> StorageResult<Vec<PruningRule>>;
}

/// Repository trait for fine-tune jobs and the rows they own.
pub trait FineTuneRepository {
    /// Inserts a job header. Fails with `UniqueViolation` if the slug is taken.
    fn insert(&self, fine_tune: &FineTune) -> StorageResult<()>;

    /// Retrieves a job by ID.
    fn get_by_id(&self, id: &FineTuneId) -> StorageResult<FineTune>;

    /// Finds the job holding a slug, in any project.
    fn find_by_slug(&self, slug: &str) -> StorageResult<Option<FineTune>>;

    /// Retrieves a job with its dataset name and derived counts.
    fn get_summary(&self, id: &FineTuneId) -> StorageResult<FineTuneSummary>;

    /// Lists a project's jobs, newest dataset first, then newest job first.
    fn list_for_project(&self, project_id: &str) -> StorageResult<Vec<FineTuneSummary>>;

    /// Counts a project's jobs.
    fn count_for_project(&self, project_id: &str) -> StorageResult<u64>;

    /// Lists a dataset's jobs, newest first.
    fn list_for_dataset(&self, dataset_id: &str) -> StorageResult<Vec<FineTuneSummary>>;

    /// Lists pending jobs of a project whose hand-off never succeeded.
    fn list_undispatched(&self, project_id: &str) -> StorageResult<Vec<FineTuneSummary>>;

    /// Renames a job. Fails with `UniqueViolation` if the slug is taken.
    fn update_slug(&self, id: &FineTuneId, slug: &str, now: DateTime<Utc>) -> StorageResult<()>;

    /// Puts a job back to pending with a fresh creation time.
    fn reset_for_restart(&self, id: &FineTuneId, now: DateTime<Utc>) -> StorageResult<()>;

    /// Writes a status and error message reported by the executor.
    fn update_status(
        &self,
        id: &FineTuneId,
        status: FineTuneStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Records the result of a hand-off to the work queue.
    ///
    /// `attempt` is the `created_at` the job carried when the hand-off began.
    /// Returns `false` without writing if a restart has stamped a newer one
    /// since.
    fn record_dispatch(
        &self,
        id: &FineTuneId,
        attempt: DateTime<Utc>,
        outcome: &DispatchOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Deletes a job and every row it owns.
    ///
    /// Run inside a transaction so the job never exists without its children.
    fn delete_cascade(&self, id: &FineTuneId) -> StorageResult<DeletedFineTune>;

    /// Dataset entry IDs frozen into the job's snapshot.
    fn training_entry_ids(&self, id: &FineTuneId) -> StorageResult<Vec<String>>;

    /// The job's pruning rule replicas with their matches.
    fn pruning_rules(&self, id: &FineTuneId) -> StorageResult<Vec<PruningRule>>;
}

// ============================================================================
// Shared Pruning Rule Loading
// ============================================================================

/// Loads every rule of one owner and all of their matches in two queries.
pub(crate) fn load_pruning_rules(
    conn: &Connection,
    owner: &RuleOwner,
) -> StorageResult<Vec<PruningRule>> {
    let (column, owner_id) = match owner {
        RuleOwner::Dataset(id) => ("dataset_id", id.as_str()),
        RuleOwner::FineTune(id) => ("fine_tune_id", id.as_str()),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT id, text_to_match, tokens_in_text, created_at FROM pruning_rules WHERE {column} = ?1 ORDER BY created_at, rowid"
    ))?;
    let mut rules = stmt
        .query_map(params![owner_id], |row| {
            Ok(PruningRule {
                id: row.get(0)?,
                owner: owner.clone(),
                text_to_match: row.get(1)?,
                tokens_in_text: row.get(2)?,
                created_at: parse_timestamp(row, 3, "created_at")?,
                matches: Vec::new(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT m.id, m.pruning_rule_id, m.dataset_entry_id FROM pruning_rule_matches m \
         JOIN pruning_rules r ON r.id = m.pruning_rule_id WHERE r.{column} = ?1 ORDER BY m.rowid"
    ))?;
    let mut matches_by_rule: HashMap<String, Vec<PruningRuleMatch>> = HashMap::new();
    let matches = stmt.query_map(params![owner_id], |row| {
        Ok(PruningRuleMatch {
            id: row.get(0)?,
            pruning_rule_id: row.get(1)?,
            dataset_entry_id: row.get(2)?,
        })
    })?;
    for m in matches {
        let m = m?;
        matches_by_rule.entry(m.pruning_rule_id.clone()).or_default().push(m);
    }

    for rule in &mut rules {
        rule.matches = matches_by_rule.remove(&rule.id).unwrap_or_default();
    }
    Ok(rules)
}

// ============================================================================
// SQLite Dataset Repository
// ============================================================================

/// SQLite implementation of DatasetRepository.
pub struct SqliteDatasetRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDatasetRepository<'a> {
    /// Creates a new SQLite dataset repository.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<DatasetEntry> {
        Ok(DatasetEntry {
            id: row.get(0)?,
            dataset_id: row.get(1)?,
            split: parse_enum_field(row, 2, "split")?,
            outdated: row.get(3)?,
            created_at: parse_timestamp(row, 4, "created_at")?,
        })
    }
}

impl DatasetRepository for SqliteDatasetRepository<'_> {
    fn create_dataset(&self, project_id: &str, name: &str) -> StorageResult<Dataset> {
        let dataset = Dataset {
            id: new_row_id(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO datasets (id, project_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![dataset.id, dataset.project_id, dataset.name, format_timestamp(dataset.created_at)],
        )?;
        info!(dataset_id = %dataset.id, project_id = %project_id, "Created dataset");
        Ok(dataset)
    }

    fn get_dataset(&self, id: &str) -> StorageResult<Dataset> {
        self.conn
            .query_row(
                "SELECT id, project_id, name, created_at FROM datasets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Dataset {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        name: row.get(2)?,
                        created_at: parse_timestamp(row, 3, "created_at")?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| not_found_error("dataset", id))
    }

    fn add_entry(&self, dataset_id: &str, split: DatasetSplit) -> StorageResult<DatasetEntry> {
        let entry = DatasetEntry {
            id: new_row_id(),
            dataset_id: dataset_id.to_string(),
            split,
            outdated: false,
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO dataset_entries (id, dataset_id, split, outdated, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.id, entry.dataset_id, split.as_str(), entry.outdated, format_timestamp(entry.created_at)],
        )?;
        debug!(entry_id = %entry.id, dataset_id = %dataset_id, split = %split, "Added dataset entry");
        Ok(entry)
    }

    fn get_entry(&self, id: &str) -> StorageResult<DatasetEntry> {
        self.conn
            .query_row(
                "SELECT id, dataset_id, split, outdated, created_at FROM dataset_entries WHERE id = ?1",
                params![id],
                Self::row_to_entry,
            )
            .optional()?
            .ok_or_else(|| not_found_error("dataset entry", id))
    }

    fn list_entries(&self, dataset_id: &str) -> StorageResult<Vec<DatasetEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, dataset_id, split, outdated, created_at FROM dataset_entries WHERE dataset_id = ?1 ORDER BY created_at, rowid",
        )?;
        let entries = stmt
            .query_map(params![dataset_id], Self::row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn set_outdated(&self, entry_id: &str, outdated: bool) -> StorageResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE dataset_entries SET outdated = ?2 WHERE id = ?1",
            params![entry_id, outdated],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("dataset entry", entry_id));
        }
        debug!(entry_id = %entry_id, outdated, "Updated dataset entry outdated flag");
        Ok(())
    }

    fn set_split(&self, entry_id: &str, split: DatasetSplit) -> StorageResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE dataset_entries SET split = ?2 WHERE id = ?1",
            params![entry_id, split.as_str()],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("dataset entry", entry_id));
        }
        debug!(entry_id = %entry_id, split = %split, "Moved dataset entry");
        Ok(())
    }

    fn add_pruning_rule(
        &self,
        dataset_id: &str,
        text_to_match: &str,
        tokens_in_text: u32,
    ) -> StorageResult<PruningRule> {
        let rule = PruningRule {
            id: new_row_id(),
            owner: RuleOwner::Dataset(dataset_id.to_string()),
            text_to_match: text_to_match.to_string(),
            tokens_in_text,
            created_at: Utc::now(),
            matches: Vec::new(),
        };
        self.conn.execute(
            "INSERT INTO pruning_rules (id, dataset_id, fine_tune_id, text_to_match, tokens_in_text, created_at) VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
            params![rule.id, dataset_id, rule.text_to_match, tokens_in_text, format_timestamp(rule.created_at)],
        )?;
        debug!(rule_id = %rule.id, dataset_id = %dataset_id, "Added pruning rule");
        Ok(rule)
    }

    fn update_pruning_rule(
        &self,
        rule_id: &str,
        text_to_match: &str,
        tokens_in_text: u32,
    ) -> StorageResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE pruning_rules SET text_to_match = ?2, tokens_in_text = ?3 WHERE id = ?1 AND dataset_id IS NOT NULL",
            params![rule_id, text_to_match, tokens_in_text],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("pruning rule", rule_id));
        }
        Ok(())
    }

    fn delete_pruning_rule(&self, rule_id: &str) -> StorageResult<()> {
        // Matches go with the rule through ON DELETE CASCADE.
        let rows_affected = self.conn.execute(
            "DELETE FROM pruning_rules WHERE id = ?1 AND dataset_id IS NOT NULL",
            params![rule_id],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("pruning rule", rule_id));
        }
        debug!(rule_id = %rule_id, "Deleted pruning rule");
        Ok(())
    }

    fn add_rule_match(
        &self,
        rule_id: &str,
        dataset_entry_id: &str,
    ) -> StorageResult<PruningRuleMatch> {
        let rule_match = PruningRuleMatch {
            id: new_row_id(),
            pruning_rule_id: rule_id.to_string(),
            dataset_entry_id: dataset_entry_id.to_string(),
        };
        let rows_affected = self.conn.execute(
            r#"
            INSERT INTO pruning_rule_matches (id, pruning_rule_id, dataset_entry_id)
            SELECT ?1, pr.id, de.id
            FROM pruning_rules pr
            JOIN dataset_entries de ON de.dataset_id = pr.dataset_id
            WHERE pr.id = ?2 AND de.id = ?3
            "#,
            params![rule_match.id, rule_id, dataset_entry_id],
        )?;
        if rows_affected == 0 {
            let dataset_rule: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM pruning_rules WHERE id = ?1 AND dataset_id IS NOT NULL)",
                params![rule_id],
                |row| row.get(0),
            )?;
            if !dataset_rule {
                return Err(not_found_error("pruning rule", rule_id));
            }
            return Err(StorageError::InvalidData(format!(
                "Dataset entry {dataset_entry_id} does not belong to the dataset of pruning rule {rule_id}"
            )));
        }
        Ok(rule_match)
    }

    fn pruning_rules(&self, dataset_id: &str) -> StorageResult<Vec<PruningRule>> {
        load_pruning_rules(self.conn, &RuleOwner::Dataset(dataset_id.to_string()))
    }
}

// ============================================================================
// SQLite Fine Tune Repository
// ============================================================================

const FINE_TUNE_COLUMNS: &str = "ft.id, ft.project_id, ft.dataset_id, ft.slug, ft.base_model, \
     ft.status, ft.pipeline_version, ft.error_message, ft.dispatch_state, ft.dispatched_at, \
     ft.dispatch_error, ft.created_at, ft.updated_at";

/// Counts come from the live tables on every read; the testing count follows
/// the dataset as it is now, the other two follow the job's own rows.
const SUMMARY_COLUMNS: &str = "d.name, \
     (SELECT COUNT(*) FROM fine_tune_training_entries te WHERE te.fine_tune_id = ft.id), \
     (SELECT COUNT(*) FROM dataset_entries de WHERE de.dataset_id = ft.dataset_id AND de.split = 'TEST' AND de.outdated = 0), \
     (SELECT COUNT(*) FROM pruning_rules pr WHERE pr.fine_tune_id = ft.id)";

/// SQLite implementation of FineTuneRepository.
pub struct SqliteFineTuneRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteFineTuneRepository<'a> {
    /// Creates a new SQLite fine tune repository.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_fine_tune(row: &Row) -> rusqlite::Result<FineTune> {
        let id: String = row.get(0)?;
        let base_model: BaseModel = parse_enum_field(row, 4, "base_model")?;
        let status: FineTuneStatus = parse_enum_field(row, 5, "status")?;
        let dispatch_state: DispatchState = parse_enum_field(row, 8, "dispatch_state")?;
        Ok(FineTune {
            id: FineTuneId(id),
            project_id: row.get(1)?,
            dataset_id: row.get(2)?,
            slug: row.get(3)?,
            base_model,
            status,
            pipeline_version: row.get(6)?,
            error_message: row.get(7)?,
            dispatch_state,
            dispatched_at: parse_optional_timestamp(row, 9, "dispatched_at")?,
            dispatch_error: row.get(10)?,
            created_at: parse_timestamp(row, 11, "created_at")?,
            updated_at: parse_timestamp(row, 12, "updated_at")?,
        })
    }

    fn row_to_summary(row: &Row) -> rusqlite::Result<FineTuneSummary> {
        Ok(FineTuneSummary {
            fine_tune: Self::row_to_fine_tune(row)?,
            dataset_name: row.get(13)?,
            num_training_entries: parse_count(row, 14)?,
            num_testing_entries: parse_count(row, 15)?,
            num_pruning_rules: parse_count(row, 16)?,
        })
    }

    fn query_summaries(
        &self,
        filter_and_order: &str,
        param: &str,
    ) -> StorageResult<Vec<FineTuneSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FINE_TUNE_COLUMNS}, {SUMMARY_COLUMNS} FROM fine_tunes ft \
             LEFT JOIN datasets d ON d.id = ft.dataset_id {filter_and_order}"
        ))?;
        let summaries = stmt
            .query_map(params![param], Self::row_to_summary)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }
}

impl FineTuneRepository for SqliteFineTuneRepository<'_> {
    fn insert(&self, fine_tune: &FineTune) -> StorageResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO fine_tunes (
                id, project_id, dataset_id, slug, base_model, status, pipeline_version,
                error_message, dispatch_state, dispatched_at, dispatch_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                fine_tune.id.as_str(),
                fine_tune.project_id,
                fine_tune.dataset_id,
                fine_tune.slug,
                fine_tune.base_model.as_str(),
                fine_tune.status.as_str(),
                fine_tune.pipeline_version,
                fine_tune.error_message,
                fine_tune.dispatch_state.as_str(),
                fine_tune.dispatched_at.map(format_timestamp),
                fine_tune.dispatch_error,
                format_timestamp(fine_tune.created_at),
                format_timestamp(fine_tune.updated_at),
            ],
        )?;
        debug!(fine_tune_id = %fine_tune.id, slug = %fine_tune.slug, "Inserted fine tune header");
        Ok(())
    }

    fn get_by_id(&self, id: &FineTuneId) -> StorageResult<FineTune> {
        self.conn
            .query_row(
                &format!("SELECT {FINE_TUNE_COLUMNS} FROM fine_tunes ft WHERE ft.id = ?1"),
                params![id.as_str()],
                Self::row_to_fine_tune,
            )
            .optional()?
            .ok_or_else(|| not_found_error("fine tune", id.as_str()))
    }

    fn find_by_slug(&self, slug: &str) -> StorageResult<Option<FineTune>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {FINE_TUNE_COLUMNS} FROM fine_tunes ft WHERE ft.slug = ?1"),
                params![slug],
                Self::row_to_fine_tune,
            )
            .optional()?)
    }

    fn get_summary(&self, id: &FineTuneId) -> StorageResult<FineTuneSummary> {
        self.query_summaries("WHERE ft.id = ?1", id.as_str())?
            .into_iter()
            .next()
            .ok_or_else(|| not_found_error("fine tune", id.as_str()))
    }

    fn list_for_project(&self, project_id: &str) -> StorageResult<Vec<FineTuneSummary>> {
        self.query_summaries(
            "WHERE ft.project_id = ?1 ORDER BY d.created_at DESC, d.rowid DESC, ft.created_at DESC, ft.rowid DESC",
            project_id,
        )
    }

    fn count_for_project(&self, project_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fine_tunes WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn list_for_dataset(&self, dataset_id: &str) -> StorageResult<Vec<FineTuneSummary>> {
        self.query_summaries(
            "WHERE ft.dataset_id = ?1 ORDER BY ft.created_at DESC, ft.rowid DESC",
            dataset_id,
        )
    }

    fn list_undispatched(&self, project_id: &str) -> StorageResult<Vec<FineTuneSummary>> {
        self.query_summaries(
            "WHERE ft.project_id = ?1 AND ft.status = 'PENDING' AND ft.dispatch_state <> 'DISPATCHED' \
             ORDER BY ft.created_at DESC, ft.rowid DESC",
            project_id,
        )
    }

    fn update_slug(&self, id: &FineTuneId, slug: &str, now: DateTime<Utc>) -> StorageResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE fine_tunes SET slug = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), slug, format_timestamp(now)],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("fine tune", id.as_str()));
        }
        debug!(fine_tune_id = %id, slug = %slug, "Renamed fine tune");
        Ok(())
    }

    fn reset_for_restart(&self, id: &FineTuneId, now: DateTime<Utc>) -> StorageResult<()> {
        let ts = format_timestamp(now);
        let rows_affected = self.conn.execute(
            r#"
            UPDATE fine_tunes SET
                status = ?2,
                error_message = NULL,
                dispatch_state = ?3,
                dispatched_at = NULL,
                dispatch_error = NULL,
                created_at = ?4,
                updated_at = ?4
            WHERE id = ?1
            "#,
            params![
                id.as_str(),
                FineTuneStatus::Pending.as_str(),
                DispatchState::NotDispatched.as_str(),
                ts
            ],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("fine tune", id.as_str()));
        }
        Ok(())
    }

    fn update_status(
        &self,
        id: &FineTuneId,
        status: FineTuneStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE fine_tunes SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
            params![id.as_str(), status.as_str(), error_message, format_timestamp(now)],
        )?;
        if rows_affected == 0 {
            return Err(not_found_error("fine tune", id.as_str()));
        }
        Ok(())
    }

    fn record_dispatch(
        &self,
        id: &FineTuneId,
        attempt: DateTime<Utc>,
        outcome: &DispatchOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let attempt = format_timestamp(attempt);
        let rows_affected = match outcome {
            DispatchOutcome::Enqueued => self.conn.execute(
                "UPDATE fine_tunes SET dispatch_state = ?3, dispatched_at = ?4, dispatch_error = NULL WHERE id = ?1 AND created_at = ?2",
                params![id.as_str(), attempt, DispatchState::Dispatched.as_str(), format_timestamp(now)],
            )?,
            DispatchOutcome::Failed(reason) => self.conn.execute(
                "UPDATE fine_tunes SET dispatch_state = ?3, dispatch_error = ?4 WHERE id = ?1 AND created_at = ?2",
                params![id.as_str(), attempt, DispatchState::Failed.as_str(), reason],
            )?,
        };
        if rows_affected > 0 {
            return Ok(true);
        }

        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM fine_tunes WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(not_found_error("fine tune", id.as_str()));
        }
        Ok(false)
    }

    fn delete_cascade(&self, id: &FineTuneId) -> StorageResult<DeletedFineTune> {
        let pruning_rule_matches = self.conn.execute(
            "DELETE FROM pruning_rule_matches WHERE pruning_rule_id IN (SELECT id FROM pruning_rules WHERE fine_tune_id = ?1)",
            params![id.as_str()],
        )?;
        let pruning_rules = self
            .conn
            .execute("DELETE FROM pruning_rules WHERE fine_tune_id = ?1", params![id.as_str()])?;
        let training_entries = self.conn.execute(
            "DELETE FROM fine_tune_training_entries WHERE fine_tune_id = ?1",
            params![id.as_str()],
        )?;
        let rows_affected =
            self.conn.execute("DELETE FROM fine_tunes WHERE id = ?1", params![id.as_str()])?;
        if rows_affected == 0 {
            return Err(not_found_error("fine tune", id.as_str()));
        }
        Ok(DeletedFineTune {
            training_entries: training_entries as u64,
            pruning_rules: pruning_rules as u64,
            pruning_rule_matches: pruning_rule_matches as u64,
        })
    }

    fn training_entry_ids(&self, id: &FineTuneId) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset_entry_id FROM fine_tune_training_entries WHERE fine_tune_id = ?1 ORDER BY rowid",
        )?;
        let ids = stmt
            .query_map(params![id.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn pruning_rules(&self, id: &FineTuneId) -> StorageResult<Vec<PruningRule>> {
        load_pruning_rules(self.conn, &RuleOwner::FineTune(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFineTune;
    use crate::storage::Database;

    fn seeded_fine_tune(db: &Database, slug: &str) -> (Dataset, FineTune) {
        let datasets = SqliteDatasetRepository::new(db.conn());
        let dataset = datasets.create_dataset("proj-1", "support").unwrap();
        let fine_tune = NewFineTune::new("proj-1", dataset.id.clone(), slug, BaseModel::Gpt35Turbo)
            .into_fine_tune(Utc::now());
        SqliteFineTuneRepository::new(db.conn()).insert(&fine_tune).unwrap();
        (dataset, fine_tune)
    }

    #[test]
    fn test_dataset_entry_flags() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteDatasetRepository::new(db.conn());
        let dataset = repo.create_dataset("proj-1", "support").unwrap();
        let entry = repo.add_entry(&dataset.id, DatasetSplit::Train).unwrap();

        repo.set_outdated(&entry.id, true).unwrap();
        repo.set_split(&entry.id, DatasetSplit::Test).unwrap();

        let stored = repo.get_entry(&entry.id).unwrap();
        assert!(stored.outdated);
        assert_eq!(stored.split, DatasetSplit::Test);
        assert!(matches!(repo.set_outdated("missing", true), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_dataset_rules_load_with_matches() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteDatasetRepository::new(db.conn());
        let dataset = repo.create_dataset("proj-1", "support").unwrap();
        let a = repo.add_entry(&dataset.id, DatasetSplit::Train).unwrap();
        let b = repo.add_entry(&dataset.id, DatasetSplit::Train).unwrap();
        let rule = repo.add_pruning_rule(&dataset.id, "You are a helpful assistant", 6).unwrap();
        repo.add_rule_match(&rule.id, &a.id).unwrap();
        repo.add_rule_match(&rule.id, &b.id).unwrap();
        repo.add_pruning_rule(&dataset.id, "unmatched", 1).unwrap();

        let rules = repo.pruning_rules(&dataset.id).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].matches.len(), 2);
        assert_eq!(rules[0].tokens_in_text, 6);
        assert!(rules[1].matches.is_empty());
    }

    #[test]
    fn test_delete_dataset_rule_removes_matches() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteDatasetRepository::new(db.conn());
        let dataset = repo.create_dataset("proj-1", "support").unwrap();
        let entry = repo.add_entry(&dataset.id, DatasetSplit::Train).unwrap();
        let rule = repo.add_pruning_rule(&dataset.id, "prefix", 1).unwrap();
        repo.add_rule_match(&rule.id, &entry.id).unwrap();

        repo.delete_pruning_rule(&rule.id).unwrap();

        assert!(repo.pruning_rules(&dataset.id).unwrap().is_empty());
        let matches: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM pruning_rule_matches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(matches, 0);
    }

    #[test]
    fn test_dataset_rule_calls_cannot_reach_replicas() {
        let db = Database::open_in_memory().unwrap();
        let (dataset, fine_tune) = seeded_fine_tune(&db, "frozen");
        let datasets = SqliteDatasetRepository::new(db.conn());
        let entry = datasets.add_entry(&dataset.id, DatasetSplit::Train).unwrap();
        db.conn()
            .execute(
                "INSERT INTO pruning_rules (id, fine_tune_id, text_to_match, tokens_in_text, created_at) VALUES ('replica', ?1, 'prefix', 1, '2024-01-01T00:00:00.000000Z')",
                params![fine_tune.id.as_str()],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO pruning_rule_matches (id, pruning_rule_id, dataset_entry_id) VALUES ('m1', 'replica', ?1)",
                params![entry.id],
            )
            .unwrap();

        let deleted = datasets.delete_pruning_rule("replica");
        assert!(matches!(deleted, Err(StorageError::NotFound(_))));
        let added = datasets.add_rule_match("replica", &entry.id);
        assert!(matches!(added, Err(StorageError::NotFound(_))));

        let replicas = SqliteFineTuneRepository::new(db.conn()).pruning_rules(&fine_tune.id).unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].matches.len(), 1);
    }

    #[test]
    fn test_rule_match_requires_entry_from_same_dataset() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteDatasetRepository::new(db.conn());
        let dataset = repo.create_dataset("proj-1", "support").unwrap();
        let other = repo.create_dataset("proj-1", "other").unwrap();
        let foreign = repo.add_entry(&other.id, DatasetSplit::Train).unwrap();
        let rule = repo.add_pruning_rule(&dataset.id, "prefix", 1).unwrap();

        let err = repo.add_rule_match(&rule.id, &foreign.id).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
        assert!(repo.pruning_rules(&dataset.id).unwrap()[0].matches.is_empty());
    }

    #[test]
    fn test_insert_and_get_fine_tune() {
        let db = Database::open_in_memory().unwrap();
        let (_, fine_tune) = seeded_fine_tune(&db, "my-model");
        let repo = SqliteFineTuneRepository::new(db.conn());

        let stored = repo.get_by_id(&fine_tune.id).unwrap();
        assert_eq!(stored, fine_tune);
        assert_eq!(repo.find_by_slug("my-model").unwrap().map(|f| f.id), Some(fine_tune.id));
        assert!(repo.find_by_slug("other").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_slug_is_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let (dataset, _) = seeded_fine_tune(&db, "taken");
        let repo = SqliteFineTuneRepository::new(db.conn());
        let second = NewFineTune::new("proj-2", dataset.id, "taken", BaseModel::Mistral7b)
            .into_fine_tune(Utc::now());

        let err = repo.insert(&second).unwrap_err();
        assert!(err.is_unique_violation_on("fine_tunes.slug"));
    }

    #[test]
    fn test_get_missing_fine_tune_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteFineTuneRepository::new(db.conn());
        let result = repo.get_by_id(&FineTuneId::from("nope"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_record_dispatch_outcomes() {
        let db = Database::open_in_memory().unwrap();
        let (_, fine_tune) = seeded_fine_tune(&db, "dispatch-me");
        let repo = SqliteFineTuneRepository::new(db.conn());

        let recorded = repo
            .record_dispatch(
                &fine_tune.id,
                fine_tune.created_at,
                &DispatchOutcome::Failed("queue down".into()),
                Utc::now(),
            )
            .unwrap();
        assert!(recorded);
        let failed = repo.get_by_id(&fine_tune.id).unwrap();
        assert_eq!(failed.dispatch_state, DispatchState::Failed);
        assert_eq!(failed.dispatch_error.as_deref(), Some("queue down"));
        assert!(failed.dispatched_at.is_none());

        repo.record_dispatch(&fine_tune.id, fine_tune.created_at, &DispatchOutcome::Enqueued, Utc::now())
            .unwrap();
        let dispatched = repo.get_by_id(&fine_tune.id).unwrap();
        assert_eq!(dispatched.dispatch_state, DispatchState::Dispatched);
        assert!(dispatched.dispatch_error.is_none());
        assert!(dispatched.dispatched_at.is_some());
    }

    #[test]
    fn test_reset_for_restart_clears_dispatch_fields() {
        let db = Database::open_in_memory().unwrap();
        let (_, fine_tune) = seeded_fine_tune(&db, "reset-me");
        let repo = SqliteFineTuneRepository::new(db.conn());
        repo.record_dispatch(&fine_tune.id, fine_tune.created_at, &DispatchOutcome::Enqueued, Utc::now())
            .unwrap();

        let restarted_at = Utc::now() + chrono::Duration::seconds(1);
        repo.reset_for_restart(&fine_tune.id, restarted_at).unwrap();
        repo.record_dispatch(
            &fine_tune.id,
            restarted_at,
            &DispatchOutcome::Failed("queue down".into()),
            restarted_at,
        )
        .unwrap();

        let failed = repo.get_by_id(&fine_tune.id).unwrap();
        assert_eq!(failed.dispatch_state, DispatchState::Failed);
        assert!(failed.dispatched_at.is_none());
    }

    #[test]
    fn test_stale_dispatch_outcome_is_not_recorded() {
        let db = Database::open_in_memory().unwrap();
        let (_, fine_tune) = seeded_fine_tune(&db, "overlap");
        let repo = SqliteFineTuneRepository::new(db.conn());

        let first = Utc::now() + chrono::Duration::seconds(1);
        let second = first + chrono::Duration::seconds(1);
        repo.reset_for_restart(&fine_tune.id, first).unwrap();
        repo.reset_for_restart(&fine_tune.id, second).unwrap();

        // The second restart's hand-off finishes first.
        assert!(repo.record_dispatch(&fine_tune.id, second, &DispatchOutcome::Enqueued, second).unwrap());
        let stale = repo
            .record_dispatch(&fine_tune.id, first, &DispatchOutcome::Failed("timeout".into()), second)
            .unwrap();
        assert!(!stale);

        let stored = repo.get_by_id(&fine_tune.id).unwrap();
        assert_eq!(stored.dispatch_state, DispatchState::Dispatched);
        assert!(stored.dispatch_error.is_none());

        let gone = repo.record_dispatch(
            &FineTuneId::from("missing"),
            first,
            &DispatchOutcome::Enqueued,
            second,
        );
        assert!(matches!(gone, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_summary_counts_testing_entries_live() {
        let db = Database::open_in_memory().unwrap();
        let (dataset, fine_tune) = seeded_fine_tune(&db, "counts");
        let datasets = SqliteDatasetRepository::new(db.conn());
        let repo = SqliteFineTuneRepository::new(db.conn());

        datasets.add_entry(&dataset.id, DatasetSplit::Test).unwrap();
        let outdated = datasets.add_entry(&dataset.id, DatasetSplit::Test).unwrap();
        datasets.set_outdated(&outdated.id, true).unwrap();

        let summary = repo.get_summary(&fine_tune.id).unwrap();
        assert_eq!(summary.dataset_name.as_deref(), Some("support"));
        assert_eq!(summary.num_testing_entries, 1);
        assert_eq!(summary.num_training_entries, 0);
        assert_eq!(summary.num_pruning_rules, 0);
    }
}
