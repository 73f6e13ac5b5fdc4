//! Migration commands: run, copy, link.

use std::path::Path;

use console::style;

use super::helpers::{announce_mode, run_options, StoreHandle};
use super::WriteArgs;
use crate::config::MergeConfig;
use crate::migrate::{MigrateError, Phases, Pipeline, StageReport};

/// Run the selected phases over the selected tables.
pub async fn cmd_migrate(
    config: &MergeConfig,
    snapshot: Option<&Path>,
    write: &WriteArgs,
    roles: &[String],
    phases: Phases,
) -> anyhow::Result<()> {
    let options = run_options(config, write)?;
    let selection = (!roles.is_empty()).then_some(roles);
    let tables = config.select_tables(selection)?;
    if tables.is_empty() {
        anyhow::bail!("No tables configured. Add [[tables]] entries to the config file.");
    }

    let handle = StoreHandle::open(config, snapshot).await?;
    let phase_label = match (phases.copy, phases.link) {
        (true, true) => "Merging, copying and relinking",
        (true, false) => "Merging and copying",
        _ => "Relinking",
    };
    println!(
        "{} {} {} table(s)",
        style("→").cyan(),
        phase_label,
        tables.len()
    );
    announce_mode(&options);

    let pipeline = Pipeline::new(handle.store(), config, options).on_report(StageReport::print);
    let result = pipeline.run(&tables, phases).await;
    // Snapshot files keep whatever was written, like the hosted base would.
    handle.finish(options.dry_run).await?;
    let reports = result.map_err(failure)?;

    let written: usize = reports.iter().map(|r| r.written).sum();
    if options.dry_run {
        println!(
            "\n{} Dry run complete. {} stage(s) planned.",
            style("✓").green(),
            reports.len()
        );
    } else {
        println!(
            "\n{} Wrote {} record(s) across {} stage(s)",
            style("✓").green(),
            written,
            reports.len()
        );
    }
    Ok(())
}

fn failure(error: MigrateError) -> anyhow::Error {
    if error.is_configuration() {
        return anyhow::Error::new(error).context("Configuration error");
    }
    eprintln!(
        "\n{} Migration aborted; batches written before the failure stay applied",
        style("✗").red()
    );
    anyhow::Error::new(error)
}
