//! Dataset seeding commands.
//!
//! These write the source side directly: datasets, entries and live pruning
//! rules. They are how a local database gets data to build fine tunes from.

use anyhow::{Context, Result};
use colored::Colorize;
use finetune_core::{DatasetRepository, SqliteDatasetRepository};
use finetune_training::DatasetSplit;
use serde::Serialize;

use super::CommandContext;
use super::types::DatasetCommand;

pub fn execute(ctx: &CommandContext, command: DatasetCommand) -> Result<()> {
    let db = ctx.open_database()?;
    let repo = SqliteDatasetRepository::new(db.conn());

    match command {
        DatasetCommand::Create { project, name } => {
            let dataset = repo.create_dataset(&project, &name).context("Failed to create dataset")?;
            report(ctx, &dataset, &format!("Created dataset {} ({})", dataset.name, dataset.id))
        }
        DatasetCommand::AddEntry { dataset_id, split, count } => {
            let split: DatasetSplit = split.parse()?;
            repo.get_dataset(&dataset_id).context("Dataset not found")?;
            let entries = (0..count)
                .map(|_| repo.add_entry(&dataset_id, split))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to add entries")?;
            report(ctx, &entries, &format!("Added {} {} entries to {}", entries.len(), split, dataset_id))
        }
        DatasetCommand::MarkOutdated { entry_id, undo } => {
            repo.set_outdated(&entry_id, !undo).context("Failed to update entry")?;
            let entry = repo.get_entry(&entry_id)?;
            let state = if entry.outdated { "outdated" } else { "current" };
            report(ctx, &entry, &format!("Entry {entry_id} is now {state}"))
        }
        DatasetCommand::SetSplit { entry_id, split } => {
            let split: DatasetSplit = split.parse()?;
            repo.set_split(&entry_id, split).context("Failed to update entry")?;
            let entry = repo.get_entry(&entry_id)?;
            report(ctx, &entry, &format!("Entry {entry_id} moved to {split}"))
        }
        DatasetCommand::AddRule { dataset_id, text, tokens } => {
            repo.get_dataset(&dataset_id).context("Dataset not found")?;
            let tokens = tokens.unwrap_or_else(|| word_count(&text));
            let rule = repo.add_pruning_rule(&dataset_id, &text, tokens).context("Failed to add rule")?;
            report(ctx, &rule, &format!("Added pruning rule {}", rule.id))
        }
        DatasetCommand::UpdateRule { rule_id, text, tokens } => {
            let tokens = tokens.unwrap_or_else(|| word_count(&text));
            repo.update_pruning_rule(&rule_id, &text, tokens).context("Failed to update rule")?;
            report(ctx, &serde_json::json!({ "id": rule_id, "text_to_match": text, "tokens_in_text": tokens }), &format!("Updated pruning rule {rule_id}"))
        }
        DatasetCommand::AddMatch { rule_id, entry_id } => {
            let rule_match = repo.add_rule_match(&rule_id, &entry_id).context("Failed to add match")?;
            report(ctx, &rule_match, &format!("Rule {rule_id} matches entry {entry_id}"))
        }
        DatasetCommand::DeleteRule { rule_id } => {
            repo.delete_pruning_rule(&rule_id).context("Failed to delete rule")?;
            report(ctx, &serde_json::json!({ "deleted": rule_id }), &format!("Deleted pruning rule {rule_id}"))
        }
    }
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

fn report<T: Serialize>(ctx: &CommandContext, value: &T, message: &str) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{} {}", "✓".green(), message);
    }
    Ok(())
}
