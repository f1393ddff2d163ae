//! Error types for Finetune Core.

use finetune_training::{FineTuneStatus, TrainingError};
use thiserror::Error;

use crate::storage::StorageError;

/// Why a request conflicts with existing state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The slug collides with a reserved comparison-model name.
    #[error("Fine tune IDs cannot match any base model names")]
    ReservedName,

    /// Another fine tune already holds the slug.
    #[error("Fine tune IDs have to be globally unique. Please choose a different ID.")]
    SlugExists,

    /// The configured restart policy forbids restarting from this status.
    #[error("Fine tunes in status {status} cannot be restarted")]
    RestartNotAllowed { status: FineTuneStatus },
}

/// Coarse error category for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    InvalidArgument,
    Internal,
}

/// Core error type for fine tune operations.
#[derive(Error, Debug)]
pub enum FineTuneError {
    /// The job or dataset does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request conflicts with existing state.
    #[error("{0}")]
    Conflict(ConflictReason),

    /// The actor lacks the capability on the project.
    #[error("Actor {actor} may not {action} project {project_id}")]
    Forbidden { actor: String, project_id: String, action: &'static str },

    /// The request itself is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage or transaction failure.
    #[error("Internal error: {0}")]
    Internal(StorageError),
}

impl FineTuneError {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the message is safe to show to the requesting actor.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<StorageError> for FineTuneError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            // The unique index is the authoritative slug check.
            e if e.is_unique_violation_on("fine_tunes.slug") => {
                Self::Conflict(ConflictReason::SlugExists)
            }
            e => Self::Internal(e),
        }
    }
}

impl From<TrainingError> for FineTuneError {
    fn from(err: TrainingError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// Result type alias for fine tune operations.
pub type Result<T> = std::result::Result<T, FineTuneError>;
