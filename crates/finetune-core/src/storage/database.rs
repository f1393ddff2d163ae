//! Database connection and schema management.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use crate::storage::error::{StorageError, StorageResult};

/// Database connection wrapper.
///
/// Manages SQLite connection and schema initialization.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a new database connection at the specified path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    /// A new `Database` instance with initialized schema.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database connection fails
    pub fn open(path: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        // Concurrent writers from other processes wait instead of failing outright.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database for testing.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database connection fails
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Gets a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Gets a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Initializes the database schema.
    ///
    /// Creates the dataset tables, the fine-tune tables and the shared
    /// pruning-rule tables. A pruning rule is owned either by a dataset or by
    /// a fine tune, never both.
    fn init_schema(&self) -> StorageResult<()> {
        info!("Initializing database schema");

        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS dataset_entries (
                id TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL,
                split TEXT NOT NULL CHECK (split IN ('TRAIN', 'TEST')),
                outdated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (dataset_id) REFERENCES datasets(id)
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS fine_tunes (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                slug TEXT NOT NULL,
                base_model TEXT NOT NULL,
                status TEXT NOT NULL,
                pipeline_version INTEGER NOT NULL,
                error_message TEXT,
                dispatch_state TEXT NOT NULL,
                dispatched_at TEXT,
                dispatch_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (dataset_id) REFERENCES datasets(id)
            )
            "#,
            [],
        )?;

        // Slugs are unique across every project, not per project.
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_fine_tunes_slug ON fine_tunes(slug)",
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS fine_tune_training_entries (
                id TEXT PRIMARY KEY,
                fine_tune_id TEXT NOT NULL,
                dataset_entry_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (fine_tune_id, dataset_entry_id),
                FOREIGN KEY (fine_tune_id) REFERENCES fine_tunes(id) ON DELETE CASCADE,
                FOREIGN KEY (dataset_entry_id) REFERENCES dataset_entries(id)
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pruning_rules (
                id TEXT PRIMARY KEY,
                dataset_id TEXT,
                fine_tune_id TEXT,
                text_to_match TEXT NOT NULL,
                tokens_in_text INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                CHECK ((dataset_id IS NULL) <> (fine_tune_id IS NULL)),
                FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE,
                FOREIGN KEY (fine_tune_id) REFERENCES fine_tunes(id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pruning_rule_matches (
                id TEXT PRIMARY KEY,
                pruning_rule_id TEXT NOT NULL,
                dataset_entry_id TEXT NOT NULL,
                UNIQUE (pruning_rule_id, dataset_entry_id),
                FOREIGN KEY (pruning_rule_id) REFERENCES pruning_rules(id) ON DELETE CASCADE,
                FOREIGN KEY (dataset_entry_id) REFERENCES dataset_entries(id)
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_datasets_project_id ON datasets(project_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dataset_entries_dataset_id ON dataset_entries(dataset_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_fine_tunes_project_id ON fine_tunes(project_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_fine_tunes_dataset_id ON fine_tunes(dataset_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pruning_rules_dataset_id ON pruning_rules(dataset_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pruning_rules_fine_tune_id ON pruning_rules(fine_tune_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pruning_rule_matches_rule_id ON pruning_rule_matches(pruning_rule_id)",
            [],
        )?;

        info!("Database schema initialized successfully");
        Ok(())
    }

    /// Runs a write transaction with the provided closure.
    ///
    /// The transaction takes the write lock up front (`BEGIN IMMEDIATE`), so
    /// reads made inside the closure cannot go stale before its writes land.
    /// Any error returned by the closure rolls every write back.
    ///
    /// # Errors
    /// Returns the closure's error, or `StorageError::Connection` if the
    /// transaction cannot be started or committed.
    pub fn transaction<F, R, E>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<R, E>,
        E: From<StorageError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        match f(&tx) {
            Ok(result) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback().map_err(StorageError::from)?;
                Err(e)
            }
        }
    }
}

/// Formats a timestamp for storage.
///
/// Fixed-width microsecond UTC so that text ordering matches time ordering.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
