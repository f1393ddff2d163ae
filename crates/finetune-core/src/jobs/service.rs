//! Fine tune job service.
//!
//! Every public operation takes the acting `Actor`, resolves the project the
//! request touches, and runs the capability check before reading or writing
//! anything else. Storage work happens under the shared database lock; the
//! lock is always released before the dispatcher is awaited.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use finetune_training::{BaseModel, BaseModelRegistry, ExecutorUpdate, FineTuneId};
use tracing::{debug, error, info, warn};

use crate::access::{AccessControl, Actor};
use crate::dispatch::Dispatcher;
use crate::error::{FineTuneError, Result};
use crate::jobs::guard::UniquenessGuard;
use crate::jobs::replicator::PruningRuleReplicator;
use crate::jobs::snapshot::SnapshotBuilder;
use crate::jobs::state::{JobPolicy, JobStateMachine};
use crate::models::{
    CreatedFineTune, DeletedFineTune, DispatchOutcome, FineTune, FineTuneSummary, NewFineTune,
    ProjectFineTunes,
};
use crate::storage::{
    Database, DatasetRepository, FineTuneRepository, SqliteDatasetRepository,
    SqliteFineTuneRepository, StorageError,
};

#[derive(Debug, Clone, Copy)]
enum Capability {
    View,
    Modify,
}

impl Capability {
    fn verb(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Modify => "modify",
        }
    }
}

/// Creates, restarts, renames, deletes and lists fine tune jobs.
pub struct FineTuneService {
    /// Database connection for persistence.
    db: Arc<Mutex<Database>>,
    access: Arc<dyn AccessControl>,
    dispatcher: Arc<dyn Dispatcher>,
    registry: BaseModelRegistry,
    state_machine: JobStateMachine,
}

impl FineTuneService {
    /// Create a new service with the default base models and job policy.
    pub fn new(
        db: Database,
        access: Arc<dyn AccessControl>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self::with_shared_db(Arc::new(Mutex::new(db)), access, dispatcher)
    }

    /// Create a service over a database shared with other components.
    pub fn with_shared_db(
        db: Arc<Mutex<Database>>,
        access: Arc<dyn AccessControl>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            db,
            access,
            dispatcher,
            registry: BaseModelRegistry::default(),
            state_machine: JobStateMachine::default(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: BaseModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: JobPolicy) -> Self {
        self.state_machine = JobStateMachine::new(policy);
        self
    }

    pub fn registry(&self) -> &BaseModelRegistry {
        &self.registry
    }

    pub fn policy(&self) -> JobPolicy {
        self.state_machine.policy()
    }

    /// The shared database handle.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }

    /// Acquires a lock on the database connection.
    fn lock_db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|e| {
            error!(error = %e, "Failed to acquire database lock");
            FineTuneError::Internal(StorageError::LockPoisoned)
        })
    }

    fn authorize(&self, actor: &Actor, project_id: &str, capability: Capability) -> Result<()> {
        let allowed = match capability {
            Capability::View => self.access.can_view(actor, project_id),
            Capability::Modify => self.access.can_modify(actor, project_id),
        };
        if allowed {
            return Ok(());
        }
        warn!(actor = %actor, project_id = %project_id, action = capability.verb(), "Access denied");
        Err(FineTuneError::Forbidden {
            actor: actor.to_string(),
            project_id: project_id.to_string(),
            action: capability.verb(),
        })
    }

    /// Lists the jobs of a project with the total count.
    pub fn list(&self, actor: &Actor, project_id: &str) -> Result<ProjectFineTunes> {
        self.authorize(actor, project_id, Capability::View)?;

        let db = self.lock_db()?;
        let repo = SqliteFineTuneRepository::new(db.conn());
        let fine_tunes = repo.list_for_project(project_id)?;
        let count = repo.count_for_project(project_id)?;
        Ok(ProjectFineTunes { fine_tunes, count })
    }

    /// Lists the jobs built from one dataset.
    pub fn list_for_dataset(&self, actor: &Actor, dataset_id: &str) -> Result<Vec<FineTuneSummary>> {
        let db = self.lock_db()?;
        let dataset = SqliteDatasetRepository::new(db.conn()).get_dataset(dataset_id)?;
        self.authorize(actor, &dataset.project_id, Capability::View)?;

        Ok(SqliteFineTuneRepository::new(db.conn()).list_for_dataset(dataset_id)?)
    }

    /// Gets one job with its counts.
    pub fn get(&self, actor: &Actor, fine_tune_id: &FineTuneId) -> Result<FineTuneSummary> {
        let db = self.lock_db()?;
        let summary = SqliteFineTuneRepository::new(db.conn()).get_summary(fine_tune_id)?;
        self.authorize(actor, &summary.fine_tune.project_id, Capability::View)?;
        Ok(summary)
    }

    /// Lists pending jobs of a project whose hand-off to the queue never succeeded.
    pub fn list_undispatched(&self, actor: &Actor, project_id: &str) -> Result<Vec<FineTuneSummary>> {
        self.authorize(actor, project_id, Capability::View)?;

        let db = self.lock_db()?;
        Ok(SqliteFineTuneRepository::new(db.conn()).list_undispatched(project_id)?)
    }

    /// Creates a job from the dataset's current state and dispatches it.
    ///
    /// The header, the training snapshot and the pruning rule replicas are
    /// written in one transaction. The job is dispatched only after commit,
    /// and a dispatch failure is reported in the returned outcome rather than
    /// as an error.
    pub async fn create(
        &self,
        actor: &Actor,
        dataset_id: &str,
        slug: &str,
        base_model: BaseModel,
    ) -> Result<CreatedFineTune> {
        let (fine_tune, num_training_entries, num_pruning_rules) = {
            let mut db = self.lock_db()?;
            let dataset = SqliteDatasetRepository::new(db.conn()).get_dataset(dataset_id)?;
            self.authorize(actor, &dataset.project_id, Capability::Modify)?;

            if !self.registry.supported().contains(&base_model) {
                return Err(FineTuneError::InvalidArgument(format!(
                    "unsupported base model: {base_model}"
                )));
            }
            if let Err(e) = UniquenessGuard::new(&self.registry).validate(db.conn(), slug, None) {
                warn!(slug = %slug, error = %e, "Rejected fine tune creation");
                return Err(e);
            }

            let now = Utc::now();
            let fine_tune =
                NewFineTune::new(dataset.project_id, dataset.id, slug, base_model).into_fine_tune(now);

            let result = db.transaction(|tx| -> Result<(u64, u64)> {
                SqliteFineTuneRepository::new(tx).insert(&fine_tune)?;
                let entries = SnapshotBuilder::new(tx).build(dataset_id, &fine_tune.id, now)?;
                self.state_machine.check_snapshot(entries)?;
                let replicated = PruningRuleReplicator::new(tx).replicate(dataset_id, &fine_tune.id, now)?;
                Ok((entries, replicated.rules))
            });
            let (entries, rules) = result.map_err(|e| {
                match &e {
                    FineTuneError::Internal(inner) => {
                        error!(slug = %slug, error = %inner, "Fine tune creation rolled back");
                    }
                    other => warn!(slug = %slug, error = %other, "Rejected fine tune creation"),
                }
                e
            })?;
            (fine_tune, entries, rules)
        };

        info!(
            fine_tune_id = %fine_tune.id,
            slug = %fine_tune.slug,
            base_model = %fine_tune.base_model,
            training_entries = num_training_entries,
            pruning_rules = num_pruning_rules,
            "Created fine tune"
        );

        let dispatch = self.dispatch(&fine_tune.id, fine_tune.created_at).await?;
        let fine_tune = self.reload(&fine_tune.id)?.unwrap_or(fine_tune);

        Ok(CreatedFineTune { fine_tune, num_training_entries, num_pruning_rules, dispatch })
    }

    /// Puts a job back to pending and dispatches it again.
    ///
    /// The snapshot and the rule replicas are left as they are.
    pub async fn restart_training(
        &self,
        actor: &Actor,
        fine_tune_id: &FineTuneId,
    ) -> Result<DispatchOutcome> {
        let restarted_at = {
            let mut db = self.lock_db()?;
            let fine_tune = SqliteFineTuneRepository::new(db.conn()).get_by_id(fine_tune_id)?;
            self.authorize(actor, &fine_tune.project_id, Capability::Modify)?;
            if let Err(e) = self.state_machine.check_restart(&fine_tune) {
                warn!(fine_tune_id = %fine_tune_id, error = %e, "Rejected fine tune restart");
                return Err(e);
            }

            let now = Utc::now();
            db.transaction(|tx| -> Result<()> {
                SqliteFineTuneRepository::new(tx).reset_for_restart(fine_tune_id, now)?;
                Ok(())
            })?;
            info!(fine_tune_id = %fine_tune_id, previous_status = %fine_tune.status, "Restarted fine tune");
            now
        };

        self.dispatch(fine_tune_id, restarted_at).await
    }

    /// Renames a job.
    pub fn update(&self, actor: &Actor, fine_tune_id: &FineTuneId, slug: &str) -> Result<FineTune> {
        let db = self.lock_db()?;
        let repo = SqliteFineTuneRepository::new(db.conn());
        let fine_tune = repo.get_by_id(fine_tune_id)?;
        self.authorize(actor, &fine_tune.project_id, Capability::Modify)?;

        // The current slug is re-checked too, so names reserved since creation are refused.
        if let Err(e) =
            UniquenessGuard::new(&self.registry).validate(db.conn(), slug, Some(fine_tune_id))
        {
            warn!(fine_tune_id = %fine_tune_id, slug = %slug, error = %e, "Rejected fine tune rename");
            return Err(e);
        }
        if fine_tune.slug == slug {
            return Ok(fine_tune);
        }

        repo.update_slug(fine_tune_id, slug, Utc::now())?;
        info!(fine_tune_id = %fine_tune_id, from = %fine_tune.slug, to = %slug, "Renamed fine tune");
        Ok(repo.get_by_id(fine_tune_id)?)
    }

    /// Deletes a job and everything it owns.
    pub fn delete(&self, actor: &Actor, fine_tune_id: &FineTuneId) -> Result<DeletedFineTune> {
        let mut db = self.lock_db()?;
        let fine_tune = SqliteFineTuneRepository::new(db.conn()).get_by_id(fine_tune_id)?;
        self.authorize(actor, &fine_tune.project_id, Capability::Modify)?;

        let deleted = db.transaction(|tx| -> Result<DeletedFineTune> {
            Ok(SqliteFineTuneRepository::new(tx).delete_cascade(fine_tune_id)?)
        })?;
        info!(
            fine_tune_id = %fine_tune_id,
            slug = %fine_tune.slug,
            training_entries = deleted.training_entries,
            pruning_rules = deleted.pruning_rules,
            "Deleted fine tune"
        );
        Ok(deleted)
    }

    /// Applies a status reported by the training executor.
    pub fn record_status(&self, fine_tune_id: &FineTuneId, update: &ExecutorUpdate) -> Result<FineTune> {
        let db = self.lock_db()?;
        let repo = SqliteFineTuneRepository::new(db.conn());
        repo.update_status(fine_tune_id, update.status(), update.error_message(), Utc::now())?;
        info!(fine_tune_id = %fine_tune_id, status = %update.status(), "Recorded executor status");
        Ok(repo.get_by_id(fine_tune_id)?)
    }

    /// Hands a committed job to the queue and records how that went.
    ///
    /// `attempt` is the creation stamp the job was committed with; an outcome
    /// that a later restart has superseded is dropped.
    async fn dispatch(
        &self,
        fine_tune_id: &FineTuneId,
        attempt: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let outcome = match self.dispatcher.enqueue(fine_tune_id).await {
            Ok(()) => {
                info!(fine_tune_id = %fine_tune_id, "Dispatched fine tune");
                DispatchOutcome::Enqueued
            }
            Err(e) => {
                warn!(fine_tune_id = %fine_tune_id, error = %e, "Failed to dispatch fine tune");
                DispatchOutcome::Failed(e.to_string())
            }
        };

        let db = self.lock_db()?;
        let recorded = SqliteFineTuneRepository::new(db.conn()).record_dispatch(
            fine_tune_id,
            attempt,
            &outcome,
            Utc::now(),
        );
        match recorded {
            Ok(true) => {}
            Ok(false) => {
                debug!(fine_tune_id = %fine_tune_id, "Dispatch outcome superseded by a later restart");
            }
            // Deleted while the dispatcher was running.
            Err(StorageError::NotFound(_)) => {
                debug!(fine_tune_id = %fine_tune_id, "Fine tune gone before dispatch was recorded");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(outcome)
    }

    fn reload(&self, fine_tune_id: &FineTuneId) -> Result<Option<FineTune>> {
        let db = self.lock_db()?;
        match SqliteFineTuneRepository::new(db.conn()).get_by_id(fine_tune_id) {
            Ok(fine_tune) => Ok(Some(fine_tune)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AllowAll, ProjectRole, StaticAccessControl};
    use crate::dispatch::LogDispatcher;
    use crate::error::ErrorKind;
    use finetune_training::DatasetSplit;

    fn service_with(access: Arc<dyn AccessControl>) -> (FineTuneService, String) {
        let db = Database::open_in_memory().unwrap();
        let datasets = SqliteDatasetRepository::new(db.conn());
        let dataset = datasets.create_dataset("p1", "support").unwrap();
        datasets.add_entry(&dataset.id, DatasetSplit::Train).unwrap();
        (FineTuneService::new(db, access, Arc::new(LogDispatcher)), dataset.id)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (service, dataset_id) = service_with(Arc::new(AllowAll));
        let actor = Actor::new("ann");

        let created =
            service.create(&actor, &dataset_id, "first", BaseModel::Gpt35Turbo).await.unwrap();
        assert!(created.dispatch.is_enqueued());
        assert_eq!(created.num_training_entries, 1);

        let summary = service.get(&actor, &created.fine_tune.id).unwrap();
        assert_eq!(summary.fine_tune.slug, "first");
        assert_eq!(summary.dataset_name.as_deref(), Some("support"));
    }

    #[tokio::test]
    async fn test_viewer_cannot_create() {
        let acl = StaticAccessControl::new().with_grant("ann", "p1", ProjectRole::Viewer);
        let (service, dataset_id) = service_with(Arc::new(acl));

        let err = service
            .create(&Actor::new("ann"), &dataset_id, "nope", BaseModel::Gpt35Turbo)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(service.list(&Actor::new("ann"), "p1").unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_missing_dataset_is_not_found() {
        let (service, _) = service_with(Arc::new(AllowAll));
        let err = service
            .create(&Actor::new("ann"), "missing", "slug", BaseModel::Gpt35Turbo)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_rename_to_same_slug_is_noop() {
        let (service, dataset_id) = service_with(Arc::new(AllowAll));
        let actor = Actor::new("ann");
        let created = service.create(&actor, &dataset_id, "same", BaseModel::Mistral7b).await.unwrap();

        let renamed = service.update(&actor, &created.fine_tune.id, "same").unwrap();
        assert_eq!(renamed.slug, "same");
        assert_eq!(renamed.updated_at, created.fine_tune.updated_at);
    }

    #[tokio::test]
    async fn test_rename_to_same_slug_rechecks_reserved_names() {
        let (service, dataset_id) = service_with(Arc::new(AllowAll));
        let actor = Actor::new("ann");
        let created = service.create(&actor, &dataset_id, "legacy", BaseModel::Mistral7b).await.unwrap();

        let reconfigured =
            FineTuneService::with_shared_db(service.database(), Arc::new(AllowAll), Arc::new(LogDispatcher))
                .with_registry(BaseModelRegistry::new(["Legacy"]));
        let err = reconfigured.update(&actor, &created.fine_tune.id, "legacy").unwrap_err();
        assert!(matches!(err, FineTuneError::Conflict(crate::error::ConflictReason::ReservedName)));
    }

    #[tokio::test]
    async fn test_restart_records_its_own_dispatch() {
        let (service, dataset_id) = service_with(Arc::new(AllowAll));
        let actor = Actor::new("ann");
        let created = service.create(&actor, &dataset_id, "again", BaseModel::Mistral7b).await.unwrap();

        service.restart_training(&actor, &created.fine_tune.id).await.unwrap();
        let summary = service.get(&actor, &created.fine_tune.id).unwrap();
        assert_eq!(summary.fine_tune.dispatch_state, finetune_training::DispatchState::Dispatched);
        assert!(summary.fine_tune.dispatched_at.is_some());
    }

    #[test]
    fn test_record_status_missing_job() {
        let (service, _) = service_with(Arc::new(AllowAll));
        let err = service
            .record_status(&FineTuneId::from("missing"), &ExecutorUpdate::Training)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
