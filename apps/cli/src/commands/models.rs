//! Base model listing.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::CommandContext;

pub fn execute(ctx: &CommandContext) -> Result<()> {
    let registry = ctx.config.base_model_registry();

    if ctx.json {
        let models: Vec<_> = registry
            .supported()
            .iter()
            .map(|model| {
                json!({
                    "value": model.as_str(),
                    "name": model.display_name(),
                    "comparison_name": model.comparison_name(),
                })
            })
            .collect();
        let reserved: Vec<&str> = registry.reserved_names().collect();
        let out = json!({ "base_models": models, "reserved_names": reserved });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Base Models ({})", registry.supported().len()).bold().cyan());
    println!();
    println!("{:<16} {:<20} {}", "Value", "Name", "Comparison name");
    println!("{}", "─".repeat(60));
    for model in registry.supported() {
        println!(
            "{:<16} {:<20} {}",
            model.as_str().cyan(),
            model.display_name(),
            model.comparison_name().dimmed()
        );
    }

    println!();
    println!("{}", "Reserved names".bold());
    for name in registry.reserved_names() {
        println!("  {}", name.dimmed());
    }
    println!();
    Ok(())
}
