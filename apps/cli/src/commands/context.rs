//! Shared state for command execution.

use std::path::Path;

use anyhow::{Context, Result};
use finetune_core::{Actor, Config, Database, FineTuneService};

/// Configuration and request identity resolved from flags and config files.
pub struct CommandContext {
    pub config: Config,
    pub actor: Actor,
    pub json: bool,
}

impl CommandContext {
    /// Resolves the configuration.
    ///
    /// Precedence for the database path: `--db`, `FINETUNE_DB`, config file, default.
    pub fn load(config_path: Option<&Path>, db: Option<String>, actor: &str, json: bool) -> Result<Self> {
        let mut config = Config::discover(config_path).context("Failed to load configuration")?;
        if let Some(path) = db {
            config.database.path = path;
        }
        Ok(Self { config, actor: Actor::new(actor), json })
    }

    /// Opens the configured database.
    pub fn open_database(&self) -> Result<Database> {
        Database::open(&self.config.database.path)
            .with_context(|| format!("Failed to open database at {}", self.config.database.path))
    }

    /// Builds the job service over the configured database, access table and dispatcher.
    pub fn service(&self) -> Result<FineTuneService> {
        let service = FineTuneService::new(
            self.open_database()?,
            self.config.access_control(),
            self.config.dispatcher(),
        )
        .with_registry(self.config.base_model_registry())
        .with_policy(self.config.jobs);
        Ok(service)
    }
}
