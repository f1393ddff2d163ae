//! Fine-tune job records.

use chrono::{DateTime, Utc};
use finetune_training::{
    BaseModel, CURRENT_PIPELINE_VERSION, DispatchState, FineTuneId, FineTuneStatus,
};
use serde::{Deserialize, Serialize};

/// Identity and control record of a fine-tune job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTune {
    pub id: FineTuneId,
    pub project_id: String,
    pub dataset_id: String,
    /// Human-chosen identifier, unique across all projects.
    pub slug: String,
    pub base_model: BaseModel,
    pub status: FineTuneStatus,
    /// Snapshot/replication logic version this job was built with. Never changes.
    pub pipeline_version: u32,
    pub error_message: Option<String>,
    pub dispatch_state: DispatchState,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub dispatch_error: Option<String>,
    /// Creation time, moved forward on restart.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Header of a fine tune about to be inserted.
#[derive(Debug, Clone)]
pub struct NewFineTune {
    pub id: FineTuneId,
    pub project_id: String,
    pub dataset_id: String,
    pub slug: String,
    pub base_model: BaseModel,
}

impl NewFineTune {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        slug: impl Into<String>,
        base_model: BaseModel,
    ) -> Self {
        Self {
            id: FineTuneId::new(),
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            slug: slug.into(),
            base_model,
        }
    }

    /// The full record as it is first stored: pending, undispatched, current pipeline.
    #[must_use]
    pub fn into_fine_tune(self, now: DateTime<Utc>) -> FineTune {
        FineTune {
            id: self.id,
            project_id: self.project_id,
            dataset_id: self.dataset_id,
            slug: self.slug,
            base_model: self.base_model,
            status: FineTuneStatus::Pending,
            pipeline_version: CURRENT_PIPELINE_VERSION,
            error_message: None,
            dispatch_state: DispatchState::NotDispatched,
            dispatched_at: None,
            dispatch_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A fine tune with the counts shown alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTuneSummary {
    #[serde(flatten)]
    pub fine_tune: FineTune,
    pub dataset_name: Option<String>,
    /// Entries frozen into the job's snapshot.
    pub num_training_entries: u64,
    /// Test-split, non-outdated entries of the dataset right now.
    pub num_testing_entries: u64,
    /// Pruning rule replicas owned by the job.
    pub num_pruning_rules: u64,
}

/// Jobs of one project plus the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFineTunes {
    pub fine_tunes: Vec<FineTuneSummary>,
    pub count: u64,
}

/// Result of handing a job to the work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Enqueued,
    Failed(String),
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued)
    }
}

/// Returned by a successful creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedFineTune {
    pub fine_tune: FineTune,
    pub num_training_entries: u64,
    pub num_pruning_rules: u64,
    pub dispatch: DispatchOutcome,
}

/// Rows removed by a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeletedFineTune {
    pub training_entries: u64,
    pub pruning_rules: u64,
    pub pruning_rule_matches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fine_tune_starts_pending_and_undispatched() {
        let now = Utc::now();
        let ft = NewFineTune::new("p1", "d1", "my-model", BaseModel::Gpt35Turbo).into_fine_tune(now);
        assert_eq!(ft.status, FineTuneStatus::Pending);
        assert_eq!(ft.dispatch_state, DispatchState::NotDispatched);
        assert_eq!(ft.pipeline_version, CURRENT_PIPELINE_VERSION);
        assert_eq!(ft.error_message, None);
        assert_eq!(ft.created_at, now);
    }

    #[test]
    fn test_summary_serializes_flat() {
        let now = Utc::now();
        let summary = FineTuneSummary {
            fine_tune: NewFineTune::new("p1", "d1", "flat", BaseModel::Mistral7b).into_fine_tune(now),
            dataset_name: Some("support".to_string()),
            num_training_entries: 4,
            num_testing_entries: 1,
            num_pruning_rules: 0,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["slug"], "flat");
        assert_eq!(value["base_model"], "MISTRAL_7B");
        assert_eq!(value["num_training_entries"], 4);
    }
}
