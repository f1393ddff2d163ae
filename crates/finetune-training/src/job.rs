use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Version of the snapshot/replication logic stamped onto every new job.
///
/// Bump this whenever the way entries or pruning rules are captured changes,
/// so the executor can keep processing older jobs the way they were built.
pub const CURRENT_PIPELINE_VERSION: u32 = 3;

/// Longest slug accepted for a fine tune.
pub const MAX_SLUG_LEN: usize = 100;

/// Identifier for a fine-tune job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FineTuneId(pub String);

impl FineTuneId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FineTuneId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FineTuneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FineTuneId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a fine tune.
///
/// `Pending -> Training -> {Deployed, Error}`; restart moves any status back
/// to `Pending`. `Training`, `Deployed` and `Error` are written by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FineTuneStatus {
    #[default]
    Pending,
    Training,
    Deployed,
    Error,
}

impl FineTuneStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Training, Self::Deployed, Self::Error];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Training => "TRAINING",
            Self::Deployed => "DEPLOYED",
            Self::Error => "ERROR",
        }
    }

    /// Whether the executor is done with the job, successfully or not.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Deployed | Self::Error)
    }
}

impl std::fmt::Display for FineTuneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FineTuneStatus {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TrainingError::UnknownStatus(s.to_string()))
    }
}

/// Outcome of handing a job to the work queue.
///
/// Lets operators tell a job that was never handed off apart from one that is
/// waiting on the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    #[default]
    NotDispatched,
    Dispatched,
    Failed,
}

impl DispatchState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDispatched => "NOT_DISPATCHED",
            Self::Dispatched => "DISPATCHED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchState {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_DISPATCHED" => Ok(Self::NotDispatched),
            "DISPATCHED" => Ok(Self::Dispatched),
            "FAILED" => Ok(Self::Failed),
            other => Err(TrainingError::UnknownDispatchState(other.to_string())),
        }
    }
}

/// Checks the shape of a human-chosen fine tune slug.
///
/// Slugs end up as model identifiers on the executor side, so they are limited
/// to ASCII letters, digits, `.`, `_` and `-`.
pub fn validate_slug(slug: &str) -> TrainingResult<()> {
    if slug.is_empty() {
        return Err(TrainingError::InvalidSlug("ID must not be empty".to_string()));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(TrainingError::InvalidSlug(format!(
            "ID must be at most {MAX_SLUG_LEN} characters"
        )));
    }
    if let Some(c) = slug.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))) {
        return Err(TrainingError::InvalidSlug(format!("ID contains invalid character {c:?}")));
    }
    Ok(())
}
