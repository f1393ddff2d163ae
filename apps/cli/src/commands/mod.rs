//! Command implementations for the Finetune CLI.

pub mod context;
pub mod dataset;
pub mod fine_tunes;
pub mod models;
pub mod types;

pub use context::CommandContext;
