//! Finetune CLI - Command-line interface for the fine tune job manager
//!
//! This CLI provides an `ft` command for creating and managing fine tune jobs
//! over a local SQLite database, seeding datasets, and writing back the
//! statuses reported by the training executor.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::DatasetCommand;
use commands::{CommandContext, dataset, fine_tunes, models};

/// Finetune CLI - fine tune job lifecycle manager
///
/// Snapshots a dataset into an immutable training job, hands it to the
/// training executor, and keeps track of it until it is deployed or deleted.
#[derive(Parser, Debug)]
#[command(
    name = "ft",
    author,
    version,
    about = "Fine tune job lifecycle manager",
    long_about = "ft creates fine tune jobs from datasets, dispatches them to the training executor,\nand manages restarts, renames and deletion."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (overrides FINETUNE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file and FINETUNE_DB)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Actor the request is made on behalf of
    #[arg(short, long, default_value = "local", global = true)]
    actor: String,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported base models and reserved names
    Models,

    /// Seed and edit datasets
    #[command(subcommand)]
    Dataset(DatasetCommand),

    /// Create a fine tune from a dataset
    ///
    /// Snapshots the dataset's current training entries and pruning rules,
    /// then dispatches the job to the training executor.
    Create {
        /// Dataset to train on
        dataset_id: String,

        /// Globally unique ID for the fine tune
        slug: String,

        /// Base model (e.g. GPT_3_5_TURBO, MISTRAL_7B)
        #[arg(short, long)]
        base_model: String,
    },

    /// List fine tunes of a project
    List {
        /// Project to list
        project_id: Option<String>,

        /// List the fine tunes of one dataset instead
        #[arg(long, conflicts_with = "project_id")]
        dataset: Option<String>,
    },

    /// Show one fine tune
    Get {
        /// Fine tune ID
        id: String,
    },

    /// Reset a fine tune to pending and dispatch it again
    Restart {
        /// Fine tune ID
        id: String,
    },

    /// Change the slug of a fine tune
    Rename {
        /// Fine tune ID
        id: String,

        /// New slug
        slug: String,
    },

    /// Delete a fine tune and everything it owns
    Delete {
        /// Fine tune ID
        id: String,
    },

    /// Record a status reported by the training executor
    Status {
        /// Fine tune ID
        id: String,

        /// New status (training, deployed, error)
        status: String,

        /// Error message, for the error status
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List pending fine tunes whose dispatch never succeeded
    Undispatched {
        /// Project to inspect
        project_id: String,
    },
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let ctx = CommandContext::load(args.config.as_deref(), args.db, &args.actor, args.json)?;

    // Initialize tracing
    let level = args
        .log_level
        .as_deref()
        .or(ctx.config.log_level.as_deref())
        .map_or(Level::INFO, parse_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Execute command
    match command {
        Command::Models => models::execute(&ctx)?,
        Command::Dataset(cmd) => dataset::execute(&ctx, cmd)?,
        Command::Create { dataset_id, slug, base_model } => {
            fine_tunes::create(&ctx, &dataset_id, &slug, &base_model).await?;
        }
        Command::List { project_id, dataset } => match (project_id, dataset) {
            (_, Some(dataset_id)) => fine_tunes::list_for_dataset(&ctx, &dataset_id)?,
            (Some(project_id), None) => fine_tunes::list(&ctx, &project_id)?,
            (None, None) => anyhow::bail!("Either a project ID or --dataset is required"),
        },
        Command::Get { id } => fine_tunes::get(&ctx, &id)?,
        Command::Restart { id } => fine_tunes::restart(&ctx, &id).await?,
        Command::Rename { id, slug } => fine_tunes::rename(&ctx, &id, &slug)?,
        Command::Delete { id } => fine_tunes::delete(&ctx, &id)?,
        Command::Status { id, status, message } => {
            fine_tunes::record_status(&ctx, &id, &status, message)?;
        }
        Command::Undispatched { project_id } => fine_tunes::undispatched(&ctx, &project_id)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let args = Args::parse_from([
            "ft", "--actor", "alice", "create", "ds-1", "my-model", "--base-model", "MISTRAL_7B",
        ]);
        assert_eq!(args.actor, "alice");
        match args.command {
            Some(Command::Create { dataset_id, slug, base_model }) => {
                assert_eq!(dataset_id, "ds-1");
                assert_eq!(slug, "my-model");
                assert_eq!(base_model, "MISTRAL_7B");
            }
            other => panic!("Expected create command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_level_falls_back_to_info() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("loud"), Level::INFO);
    }
}
