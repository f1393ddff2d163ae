//! Finetune Training
//!
//! Backend-agnostic vocabulary shared between the job lifecycle manager and
//! the external training executor:
//! - Identifying fine-tune jobs (`FineTuneId`) and their status machine
//! - The supported base models and the reserved comparison names
//! - Dataset splits
//! - Status updates written back by the executor

pub mod base_models;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod job;

pub use base_models::{BaseModel, BaseModelRegistry, COMPARISON_ONLY_MODEL_NAMES};
pub use dataset::DatasetSplit;
pub use error::{TrainingError, TrainingResult};
pub use executor::ExecutorUpdate;
pub use job::{
    CURRENT_PIPELINE_VERSION, DispatchState, FineTuneId, FineTuneStatus, MAX_SLUG_LEN,
    validate_slug,
};
