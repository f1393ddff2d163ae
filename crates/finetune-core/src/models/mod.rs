//! Data models for Finetune Core.
//!
//! Records read from and written to storage: datasets with their entries and
//! pruning rules on the source side, fine tunes and their derived counts on
//! the job side.

pub mod dataset;
pub mod fine_tune;

pub use dataset::{Dataset, DatasetEntry, PruningRule, PruningRuleMatch, RuleOwner};
pub use fine_tune::{
    CreatedFineTune, DeletedFineTune, DispatchOutcome, FineTune, FineTuneSummary, NewFineTune,
    ProjectFineTunes,
};
