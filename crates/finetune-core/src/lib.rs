//! Finetune Core - fine tune job lifecycle management.
//!
//! This crate provides:
//! - SQLite storage for datasets, fine tunes and their owned rows
//! - The job components: slug guard, snapshot builder, pruning rule replicator
//!   and the restart/delete state machine
//! - Project-scoped access control and work queue dispatch adapters
//! - Configuration and error handling
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use finetune_core::{Actor, AllowAll, Database, FineTuneService, LogDispatcher};
//! use finetune_training::BaseModel;
//!
//! # async fn run() -> finetune_core::Result<()> {
//! let db = Database::open("finetune.db")?;
//! let service = FineTuneService::new(db, Arc::new(AllowAll), Arc::new(LogDispatcher));
//! let created = service
//!     .create(&Actor::new("alice"), "dataset-id", "support-bot-v1", BaseModel::Gpt35Turbo)
//!     .await?;
//! println!("{} -> {:?}", created.fine_tune.slug, created.dispatch);
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod models;
pub mod storage;

pub use access::{AccessControl, Actor, AllowAll, ProjectRole, StaticAccessControl};
pub use config::{Config, ConfigError};
pub use dispatch::{ChannelDispatcher, DispatchError, DispatchRecord, Dispatcher, LogDispatcher, SpoolDispatcher};
pub use error::{ConflictReason, ErrorKind, FineTuneError, Result};
pub use jobs::{FineTuneService, JobPolicy, RestartPolicy};
pub use models::{
    CreatedFineTune, Dataset, DatasetEntry, DeletedFineTune, DispatchOutcome, FineTune,
    FineTuneSummary, ProjectFineTunes, PruningRule, PruningRuleMatch, RuleOwner,
};
pub use storage::{
    Database, DatasetRepository, FineTuneRepository, SqliteDatasetRepository,
    SqliteFineTuneRepository, StorageError,
};
