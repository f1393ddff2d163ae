//! Configuration for Finetune Core.
//!
//! Loaded from a TOML file found by `Config::discover`:
//! 1. An explicit path (`--config`)
//! 2. `FINETUNE_CONFIG`
//! 3. `./.finetunerc`
//! 4. `~/.finetune/config.toml`
//!
//! The first file found wins; with none, defaults apply. `FINETUNE_DB`
//! overrides the database path from any source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use finetune_training::BaseModelRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::{AccessControl, AllowAll, ProjectRole, StaticAccessControl};
use crate::dispatch::{Dispatcher, LogDispatcher, SpoolDispatcher};
use crate::jobs::JobPolicy;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "FINETUNE_CONFIG";
/// Environment variable overriding the database path.
pub const DATABASE_ENV: &str = "FINETUNE_DB";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "finetune.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

/// Base model configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseModelsConfig {
    /// Names reserved in addition to the built-in comparison models.
    #[serde(default)]
    pub extra_reserved_names: Vec<String>,
}

/// Which work queue adapter to hand jobs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    #[default]
    Spool,
    Log,
}

/// Dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub kind: DispatchKind,
    /// JSON-lines file the spool adapter appends to.
    #[serde(default = "default_spool_path")]
    pub spool_path: String,
}

fn default_spool_path() -> String {
    "dispatch.jsonl".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { kind: DispatchKind::default(), spool_path: default_spool_path() }
    }
}

/// One `(actor, project) -> role` grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub actor: String,
    pub project: String,
    pub role: ProjectRole,
}

/// Access control configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Skip capability checks entirely.
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jobs: JobPolicy,
    #[serde(default)]
    pub base_models: BaseModelsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".finetune")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".finetunerc")
    }

    /// Finds and loads the configuration, then applies environment overrides.
    ///
    /// An explicitly requested file (argument or `FINETUNE_CONFIG`) must
    /// exist; the local and global defaults are optional.
    pub fn discover(explicit: Option<&Path>) -> ConfigResult<Self> {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match requested {
            Some(path) => Self::load_from_file(&path)?,
            None => [Self::default_local_path(), Self::default_global_path()]
                .iter()
                .find(|path| path.exists())
                .map_or_else(|| Ok(Self::default()), |path| Self::load_from_file(path))?,
        };

        if let Ok(path) = std::env::var(DATABASE_ENV) {
            config.database.path = path;
        }
        Ok(config)
    }

    /// Registry of supported models and reserved names.
    pub fn base_model_registry(&self) -> BaseModelRegistry {
        BaseModelRegistry::new(&self.base_models.extra_reserved_names)
    }

    /// Capability check built from the `[access]` section.
    pub fn access_control(&self) -> Arc<dyn AccessControl> {
        if self.access.allow_all {
            return Arc::new(AllowAll);
        }
        let acl = self.access.grants.iter().fold(StaticAccessControl::new(), |acl, grant| {
            acl.with_grant(grant.actor.clone(), grant.project.clone(), grant.role)
        });
        Arc::new(acl)
    }

    /// Work queue adapter built from the `[dispatch]` section.
    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        match self.dispatch.kind {
            DispatchKind::Spool => Arc::new(SpoolDispatcher::new(&self.dispatch.spool_path)),
            DispatchKind::Log => Arc::new(LogDispatcher),
        }
    }
}
