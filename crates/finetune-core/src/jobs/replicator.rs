//! Deep copies of dataset pruning rules owned by a job.

use chrono::{DateTime, Utc};
use finetune_training::FineTuneId;
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::RuleOwner;
use crate::storage::repositories::load_pruning_rules;
use crate::storage::{StorageResult, format_timestamp};

/// Rows written by one replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Replicated {
    pub rules: u64,
    pub matches: u64,
}

/// Copies a dataset's pruning rules and their matches to a job.
///
/// Replicas get fresh ids and keep no reference to the source rule, so later
/// edits to the dataset's rules never reach the job.
pub struct PruningRuleReplicator<'a> {
    conn: &'a Connection,
}

impl<'a> PruningRuleReplicator<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn replicate(
        &self,
        dataset_id: &str,
        fine_tune_id: &FineTuneId,
        now: DateTime<Utc>,
    ) -> StorageResult<Replicated> {
        let sources = load_pruning_rules(self.conn, &RuleOwner::Dataset(dataset_id.to_string()))?;
        let created_at = format_timestamp(now);

        let mut insert_rule = self.conn.prepare_cached(
            "INSERT INTO pruning_rules (id, dataset_id, fine_tune_id, text_to_match, tokens_in_text, created_at) VALUES (?1, NULL, ?2, ?3, ?4, ?5)",
        )?;
        let mut insert_match = self.conn.prepare_cached(
            "INSERT INTO pruning_rule_matches (id, pruning_rule_id, dataset_entry_id) VALUES (?1, ?2, ?3)",
        )?;

        let mut replicated = Replicated::default();
        for source in &sources {
            let replica_id = Uuid::new_v4().to_string();
            insert_rule.execute(params![
                replica_id,
                fine_tune_id.as_str(),
                source.text_to_match,
                source.tokens_in_text,
                created_at
            ])?;
            replicated.rules += 1;

            for source_match in &source.matches {
                insert_match.execute(params![
                    Uuid::new_v4().to_string(),
                    replica_id,
                    source_match.dataset_entry_id
                ])?;
                replicated.matches += 1;
            }
        }

        debug!(
            fine_tune_id = %fine_tune_id,
            rules = replicated.rules,
            matches = replicated.matches,
            "Replicated pruning rules"
        );
        Ok(replicated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFineTune;
    use crate::storage::{
        Database, DatasetRepository, FineTuneRepository, SqliteDatasetRepository,
        SqliteFineTuneRepository,
    };
    use finetune_training::{BaseModel, DatasetSplit};

    #[test]
    fn test_replicas_copy_rules_and_matches() {
        let db = Database::open_in_memory().unwrap();
        let datasets = SqliteDatasetRepository::new(db.conn());
        let dataset = datasets.create_dataset("p1", "ds").unwrap();
        let entry = datasets.add_entry(&dataset.id, DatasetSplit::Train).unwrap();
        let rule = datasets.add_pruning_rule(&dataset.id, "System: be brief", 4).unwrap();
        datasets.add_rule_match(&rule.id, &entry.id).unwrap();
        datasets.add_pruning_rule(&dataset.id, "no matches", 2).unwrap();

        let fine_tune = NewFineTune::new("p1", dataset.id.clone(), "rep", BaseModel::Llama2_7b)
            .into_fine_tune(Utc::now());
        let fine_tunes = SqliteFineTuneRepository::new(db.conn());
        fine_tunes.insert(&fine_tune).unwrap();

        let replicated = PruningRuleReplicator::new(db.conn())
            .replicate(&dataset.id, &fine_tune.id, Utc::now())
            .unwrap();
        assert_eq!(replicated, Replicated { rules: 2, matches: 1 });

        let replicas = fine_tunes.pruning_rules(&fine_tune.id).unwrap();
        assert_eq!(replicas.len(), 2);
        assert_ne!(replicas[0].id, rule.id);
        assert_eq!(replicas[0].owner, RuleOwner::FineTune(fine_tune.id.clone()));
        assert_eq!(replicas[0].text_to_match, "System: be brief");
        assert_eq!(replicas[0].tokens_in_text, 4);
        assert_eq!(replicas[0].matches[0].dataset_entry_id, entry.id);

        // Source rules are untouched.
        assert_eq!(datasets.pruning_rules(&dataset.id).unwrap().len(), 2);
    }
}
