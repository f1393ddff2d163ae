//! Fine tune job lifecycle.
//!
//! The components, leaves first:
//! - `UniquenessGuard` checks a slug before any write
//! - `SnapshotBuilder` freezes the dataset's training entries into the job
//! - `PruningRuleReplicator` deep-copies the dataset's pruning rules
//! - `JobStateMachine` applies the restart and empty-snapshot policies
//! - `FineTuneService` ties them together behind the capability check

pub mod guard;
pub mod replicator;
pub mod service;
pub mod snapshot;
pub mod state;

pub use guard::UniquenessGuard;
pub use replicator::{PruningRuleReplicator, Replicated};
pub use service::FineTuneService;
pub use snapshot::SnapshotBuilder;
pub use state::{JobPolicy, JobStateMachine, RestartPolicy};
