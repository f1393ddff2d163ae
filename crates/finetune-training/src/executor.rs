use crate::job::FineTuneStatus;
use serde::{Deserialize, Serialize};

/// Status write reported by the training executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorUpdate {
    Training,
    Deployed,
    Error { message: String },
}

impl ExecutorUpdate {
    #[must_use]
    pub fn status(&self) -> FineTuneStatus {
        match self {
            Self::Training => FineTuneStatus::Training,
            Self::Deployed => FineTuneStatus::Deployed,
            Self::Error { .. } => FineTuneStatus::Error,
        }
    }

    /// Error message to store alongside the status; cleared for non-error updates.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            Self::Training | Self::Deployed => None,
        }
    }
}
