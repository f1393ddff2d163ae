//! Fine tune job commands.

use anyhow::{Result, bail};
use colored::Colorize;
use finetune_core::{DispatchOutcome, FineTune, FineTuneSummary};
use finetune_training::{ExecutorUpdate, FineTuneId, FineTuneStatus};
use serde::Serialize;

use super::CommandContext;

pub async fn create(ctx: &CommandContext, dataset_id: &str, slug: &str, base_model: &str) -> Result<()> {
    let service = ctx.service()?;
    let base_model = service.registry().parse(base_model)?;
    let created = service.create(&ctx.actor, dataset_id, slug, base_model).await?;

    if ctx.json {
        return print_json(&created);
    }

    println!("{} Created fine tune {}", "✓".green(), created.fine_tune.slug.bold());
    println!("  {:<18} {}", "ID:", created.fine_tune.id);
    println!("  {:<18} {}", "Base model:", created.fine_tune.base_model);
    println!("  {:<18} {}", "Training entries:", created.num_training_entries);
    println!("  {:<18} {}", "Pruning rules:", created.num_pruning_rules);
    print_dispatch(&created.dispatch);
    Ok(())
}

pub fn list(ctx: &CommandContext, project_id: &str) -> Result<()> {
    let page = ctx.service()?.list(&ctx.actor, project_id)?;

    if ctx.json {
        return print_json(&page);
    }

    println!();
    println!("{}", format!("Fine Tunes ({})", page.count).bold().cyan());
    print_table(&page.fine_tunes);
    Ok(())
}

pub fn list_for_dataset(ctx: &CommandContext, dataset_id: &str) -> Result<()> {
    let fine_tunes = ctx.service()?.list_for_dataset(&ctx.actor, dataset_id)?;

    if ctx.json {
        return print_json(&fine_tunes);
    }

    println!();
    println!("{}", format!("Fine Tunes for dataset {dataset_id} ({})", fine_tunes.len()).bold().cyan());
    print_table(&fine_tunes);
    Ok(())
}

pub fn get(ctx: &CommandContext, id: &str) -> Result<()> {
    let summary = ctx.service()?.get(&ctx.actor, &FineTuneId::from(id))?;

    if ctx.json {
        return print_json(&summary);
    }

    let ft = &summary.fine_tune;
    println!();
    println!("{}", ft.slug.bold().cyan());
    println!("  {:<18} {}", "ID:", ft.id);
    println!("  {:<18} {}", "Project:", ft.project_id);
    println!(
        "  {:<18} {} ({})",
        "Dataset:",
        summary.dataset_name.as_deref().unwrap_or("-"),
        ft.dataset_id
    );
    println!("  {:<18} {}", "Base model:", ft.base_model);
    println!("  {:<18} {}", "Status:", status_label(ft.status));
    if let Some(message) = &ft.error_message {
        println!("  {:<18} {}", "Error:", message.red());
    }
    println!("  {:<18} {}", "Dispatch:", ft.dispatch_state);
    if let Some(message) = &ft.dispatch_error {
        println!("  {:<18} {}", "Dispatch error:", message.red());
    }
    println!("  {:<18} {}", "Pipeline version:", ft.pipeline_version);
    println!("  {:<18} {}", "Training entries:", summary.num_training_entries);
    println!("  {:<18} {}", "Testing entries:", summary.num_testing_entries);
    println!("  {:<18} {}", "Pruning rules:", summary.num_pruning_rules);
    println!("  {:<18} {}", "Created:", ft.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  {:<18} {}", "Updated:", ft.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    Ok(())
}

pub async fn restart(ctx: &CommandContext, id: &str) -> Result<()> {
    let outcome = ctx.service()?.restart_training(&ctx.actor, &FineTuneId::from(id)).await?;

    if ctx.json {
        return print_json(&outcome);
    }

    println!("{} Restarted fine tune {}", "✓".green(), id);
    print_dispatch(&outcome);
    Ok(())
}

pub fn rename(ctx: &CommandContext, id: &str, slug: &str) -> Result<()> {
    let fine_tune = ctx.service()?.update(&ctx.actor, &FineTuneId::from(id), slug)?;
    print_fine_tune(ctx, &fine_tune, &format!("Renamed fine tune to {}", fine_tune.slug.bold()))
}

pub fn delete(ctx: &CommandContext, id: &str) -> Result<()> {
    let deleted = ctx.service()?.delete(&ctx.actor, &FineTuneId::from(id))?;

    if ctx.json {
        return print_json(&deleted);
    }

    println!("{} Deleted fine tune {}", "✓".green(), id);
    println!(
        "  removed {} training entries, {} pruning rules, {} rule matches",
        deleted.training_entries, deleted.pruning_rules, deleted.pruning_rule_matches
    );
    Ok(())
}

pub fn record_status(ctx: &CommandContext, id: &str, status: &str, message: Option<String>) -> Result<()> {
    let update = executor_update(status, message)?;
    let fine_tune = ctx.service()?.record_status(&FineTuneId::from(id), &update)?;
    print_fine_tune(ctx, &fine_tune, &format!("Fine tune {} is now {}", id, status_label(fine_tune.status)))
}

pub fn undispatched(ctx: &CommandContext, project_id: &str) -> Result<()> {
    let fine_tunes = ctx.service()?.list_undispatched(&ctx.actor, project_id)?;

    if ctx.json {
        return print_json(&fine_tunes);
    }

    println!();
    println!("{}", format!("Undispatched Fine Tunes ({})", fine_tunes.len()).bold().cyan());
    print_table(&fine_tunes);
    Ok(())
}

/// Maps a status name given on the command line to an executor write.
fn executor_update(status: &str, message: Option<String>) -> Result<ExecutorUpdate> {
    let status: FineTuneStatus = status.parse()?;
    let update = match status {
        FineTuneStatus::Training => ExecutorUpdate::Training,
        FineTuneStatus::Deployed => ExecutorUpdate::Deployed,
        FineTuneStatus::Error => ExecutorUpdate::Error {
            message: message.unwrap_or_else(|| "Training failed".to_string()),
        },
        other => bail!("the executor cannot report status {other}"),
    };
    Ok(update)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_fine_tune(ctx: &CommandContext, fine_tune: &FineTune, message: &str) -> Result<()> {
    if ctx.json {
        return print_json(fine_tune);
    }
    println!("{} {}", "✓".green(), message);
    Ok(())
}

fn print_dispatch(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Enqueued => println!("  {:<18} {}", "Dispatch:", "enqueued".green()),
        DispatchOutcome::Failed(reason) => {
            println!("  {:<18} {}", "Dispatch:", "failed".red());
            println!("  {:<18} {}", "Reason:", reason);
            println!("  {}", "Run `ft restart` once the queue is reachable.".dimmed());
        }
    }
}

fn print_table(fine_tunes: &[FineTuneSummary]) {
    println!();
    if fine_tunes.is_empty() {
        println!("  {}", "No fine tunes found.".dimmed());
        println!();
        return;
    }

    println!(
        "{:<36} {:<24} {:<14} {:<10} {:>6} {:>6} {:>6}",
        "ID", "Slug", "Base model", "Status", "Train", "Test", "Rules"
    );
    println!("{}", "─".repeat(108));
    for summary in fine_tunes {
        let ft = &summary.fine_tune;
        println!(
            "{:<36} {:<24} {:<14} {:<10} {:>6} {:>6} {:>6}",
            ft.id.as_str().dimmed(),
            ft.slug,
            ft.base_model.as_str(),
            status_label(ft.status),
            summary.num_training_entries,
            summary.num_testing_entries,
            summary.num_pruning_rules
        );
    }
    println!();
}

fn status_label(status: FineTuneStatus) -> colored::ColoredString {
    let label = status.as_str();
    match status {
        FineTuneStatus::Deployed => label.green(),
        FineTuneStatus::Error => label.red(),
        FineTuneStatus::Training => label.yellow(),
        _ => label.normal(),
    }
}
