//! Storage layer for Finetune Core.
//!
//! This module provides data persistence using SQLite with the Repository pattern.
//! It includes repositories for datasets and fine-tune jobs.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod repositories;

pub use database::{Database, format_timestamp};
pub use error::{StorageError, StorageResult};
pub use repositories::{
    DatasetRepository, FineTuneRepository, SqliteDatasetRepository, SqliteFineTuneRepository,
};
