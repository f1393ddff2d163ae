use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrainingError {
    #[error("invalid fine tune ID: {0}")]
    InvalidSlug(String),

    #[error("unsupported base model: {0}")]
    UnknownBaseModel(String),

    #[error("unknown fine tune status: {0}")]
    UnknownStatus(String),

    #[error("unknown dispatch state: {0}")]
    UnknownDispatchState(String),

    #[error("unknown dataset split: {0}")]
    UnknownSplit(String),
}
