//! Shared test utilities for Finetune Core integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use finetune_core::{
    AllowAll, Database, DatasetEntry, DatasetRepository, DispatchError, Dispatcher,
    FineTuneService, JobPolicy, SqliteDatasetRepository,
};
use finetune_training::{DatasetSplit, FineTuneId};

/// Dispatcher that records every enqueued job and can be told to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<FineTuneId>>,
    fail: AtomicBool,
}

impl RecordingDispatcher {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<FineTuneId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &FineTuneId) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| *call == id).count()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn enqueue(&self, fine_tune_id: &FineTuneId) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }
        self.calls.lock().unwrap().push(fine_tune_id.clone());
        Ok(())
    }
}

/// A service over an in-memory database with a recording dispatcher.
pub struct TestEnv {
    pub service: FineTuneService,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub db: Arc<Mutex<Database>>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_policy(JobPolicy::default())
    }

    pub fn with_policy(policy: JobPolicy) -> Self {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let service =
            FineTuneService::with_shared_db(Arc::clone(&db), Arc::new(AllowAll), dispatcher.clone())
                .with_policy(policy);
        Self { service, dispatcher, db }
    }

    /// Creates a dataset with `train` train entries and `test` test entries.
    pub fn seed_dataset(
        &self,
        project_id: &str,
        name: &str,
        train: usize,
        test: usize,
    ) -> (String, Vec<DatasetEntry>) {
        let db = self.db.lock().unwrap();
        seed_dataset(&db, project_id, name, train, test)
    }

    /// Adds a dataset pruning rule matching the given entries.
    pub fn add_rule(&self, dataset_id: &str, text: &str, matched: &[&DatasetEntry]) -> String {
        let db = self.db.lock().unwrap();
        let repo = SqliteDatasetRepository::new(db.conn());
        let rule = repo.add_pruning_rule(dataset_id, text, text.split_whitespace().count() as u32).unwrap();
        for entry in matched {
            repo.add_rule_match(&rule.id, &entry.id).unwrap();
        }
        rule.id
    }

    /// Counts rows of `table` matching a `WHERE` clause with one parameter.
    pub fn count_rows(&self, table: &str, filter: &str, param: &str) -> i64 {
        let db = self.db.lock().unwrap();
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table} WHERE {filter}"), [param], |row| {
                row.get(0)
            })
            .unwrap()
    }

    /// Counts rows of `table` matching a literal `WHERE` clause.
    pub fn count_where(&self, table: &str, filter: &str) -> i64 {
        let db = self.db.lock().unwrap();
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table} WHERE {filter}"), [], |row| row.get(0))
            .unwrap()
    }
}

pub fn seed_dataset(
    db: &Database,
    project_id: &str,
    name: &str,
    train: usize,
    test: usize,
) -> (String, Vec<DatasetEntry>) {
    let repo = SqliteDatasetRepository::new(db.conn());
    let dataset = repo.create_dataset(project_id, name).unwrap();
    let mut entries = Vec::new();
    for _ in 0..train {
        entries.push(repo.add_entry(&dataset.id, DatasetSplit::Train).unwrap());
    }
    for _ in 0..test {
        entries.push(repo.add_entry(&dataset.id, DatasetSplit::Test).unwrap());
    }
    (dataset.id, entries)
}
