//! Dataset-side records that fine tunes are built from.

use chrono::{DateTime, Utc};
use finetune_training::{DatasetSplit, FineTuneId};
use serde::{Deserialize, Serialize};

/// A dataset belonging to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One example in a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    pub dataset_id: String,
    pub split: DatasetSplit,
    /// Superseded by a newer version; never included in new snapshots.
    pub outdated: bool,
    pub created_at: DateTime<Utc>,
}

/// Who a pruning rule belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RuleOwner {
    /// A live rule edited on the dataset.
    Dataset(String),
    /// A frozen replica owned by a fine tune.
    FineTune(FineTuneId),
}

/// A text-matching rule used by the executor to trim training context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningRule {
    pub id: String,
    pub owner: RuleOwner,
    pub text_to_match: String,
    /// Precomputed token count of `text_to_match`.
    pub tokens_in_text: u32,
    pub created_at: DateTime<Utc>,
    /// Dataset entries this rule matched.
    pub matches: Vec<PruningRuleMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningRuleMatch {
    pub id: String,
    pub pruning_rule_id: String,
    pub dataset_entry_id: String,
}
