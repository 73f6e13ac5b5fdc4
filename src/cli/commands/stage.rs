//! CSV staging command.

use std::path::Path;

use console::style;

use super::helpers::{announce_mode, run_options, StoreHandle};
use super::WriteArgs;
use crate::config::MergeConfig;
use crate::staging::{stage_csv, StageOptions};

/// Load a CSV export into a staging table.
pub async fn cmd_stage(
    config: &MergeConfig,
    snapshot: Option<&Path>,
    file: &Path,
    table: &str,
    keep_unmapped: bool,
    write: &WriteArgs,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("CSV file not found: {}", file.display());
    }

    let options = run_options(config, write)?;
    let handle = StoreHandle::open(config, snapshot).await?;
    println!(
        "{} Staging {} into {}",
        style("→").cyan(),
        file.display(),
        style(table).bold()
    );
    if config.staging.columns.is_empty() && !keep_unmapped {
        println!(
            "{} No [staging] column map configured; use --keep-unmapped to load columns as-is",
            style("!").yellow()
        );
    }
    announce_mode(&options);

    let stage = StageOptions {
        table: table.to_string(),
        keep_unmapped,
    };
    let result = stage_csv(handle.store(), file, &config.staging, &stage, &options).await;
    handle.finish(options.dry_run).await?;
    let report = result?;
    report.print();
    Ok(())
}
