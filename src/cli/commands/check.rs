//! Schema check command.

use std::path::Path;

use console::style;

use super::helpers::StoreHandle;
use crate::config::MergeConfig;
use crate::migrate::check_schema;

/// Verify every configured field against the store schema.
pub async fn cmd_check(config: &MergeConfig, snapshot: Option<&Path>) -> anyhow::Result<()> {
    if config.tables.is_empty() {
        anyhow::bail!("No tables configured. Add [[tables]] entries to the config file.");
    }

    let handle = StoreHandle::open(config, snapshot).await?;
    println!(
        "{} Checking {} table(s)",
        style("→").cyan(),
        config.tables.len()
    );

    let problems = check_schema(handle.store(), config).await?;
    if problems.is_empty() {
        for table in &config.tables {
            println!(
                "  {} {} ({} -> {})",
                style("✓").green(),
                table.role,
                table.source,
                table.target
            );
        }
        println!("\n{} All configured fields exist", style("✓").green());
        return Ok(());
    }

    for problem in &problems {
        println!("  {} {}", style("✗").red(), problem);
    }
    anyhow::bail!("{} schema problem(s) found", problems.len())
}
