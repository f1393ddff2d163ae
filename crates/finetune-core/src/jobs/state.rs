//! Job status transitions and the policies that gate them.
//!
//! ```text
//! Pending -> Training -> Deployed
//!                    \-> Error
//! Deployed | Error -> Pending   (restart)
//! Pending (undispatched) -> Pending   (restart)
//! ```
//!
//! Executor writes are taken as reported. Restart is the only transition
//! driven by users, and the configured `RestartPolicy` decides which statuses
//! it may start from.

use finetune_training::{DispatchState, FineTuneStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ConflictReason, FineTuneError, Result};
use crate::models::FineTune;

/// Which statuses a job may be restarted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart from any status, including a job that is still training.
    #[default]
    Any,
    /// Restart only once the executor is done with the job, or when a
    /// pending job never reached the executor because its dispatch failed.
    SettledOnly,
}

impl RestartPolicy {
    #[must_use]
    pub fn allows(self, fine_tune: &FineTune) -> bool {
        match self {
            Self::Any => true,
            Self::SettledOnly => {
                fine_tune.status.is_settled()
                    || (fine_tune.status == FineTuneStatus::Pending
                        && fine_tune.dispatch_state != DispatchState::Dispatched)
            }
        }
    }
}

/// Lifecycle policy, read from the `[jobs]` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPolicy {
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Whether a job may be created from a dataset with no eligible training entries.
    #[serde(default = "default_allow_empty_snapshot")]
    pub allow_empty_snapshot: bool,
}

fn default_allow_empty_snapshot() -> bool {
    true
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self { restart_policy: RestartPolicy::default(), allow_empty_snapshot: true }
    }
}

/// Applies a `JobPolicy` to lifecycle requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStateMachine {
    policy: JobPolicy,
}

impl JobStateMachine {
    pub fn new(policy: JobPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> JobPolicy {
        self.policy
    }

    /// Checks that `fine_tune` may be put back to pending.
    pub fn check_restart(&self, fine_tune: &FineTune) -> Result<()> {
        if self.policy.restart_policy.allows(fine_tune) {
            Ok(())
        } else {
            Err(FineTuneError::Conflict(ConflictReason::RestartNotAllowed {
                status: fine_tune.status,
            }))
        }
    }

    /// Checks the size of a freshly built snapshot.
    pub fn check_snapshot(&self, training_entries: u64) -> Result<()> {
        if training_entries == 0 && !self.policy.allow_empty_snapshot {
            return Err(FineTuneError::InvalidArgument(
                "Dataset has no training entries to fine tune on".to_string(),
            ));
        }
        Ok(())
    }
}
