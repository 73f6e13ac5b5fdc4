//! Shared helper functions for CLI commands.

use std::path::{Path, PathBuf};

use console::style;

use super::WriteArgs;
use crate::config::MergeConfig;
use crate::migrate::RunOptions;
use crate::store::{AirtableStore, MemoryStore, TableStore};

/// The store a command works against: the hosted base or a local snapshot file.
pub enum StoreHandle {
    Airtable(AirtableStore),
    Snapshot { store: MemoryStore, path: PathBuf },
}

impl StoreHandle {
    /// Open the snapshot file when one is given, the configured base otherwise.
    pub async fn open(config: &MergeConfig, snapshot: Option<&Path>) -> anyhow::Result<Self> {
        match snapshot {
            Some(path) => {
                let store = MemoryStore::load(path).await?;
                println!(
                    "{} Using snapshot {}",
                    style("→").cyan(),
                    style(path.display()).bold()
                );
                Ok(StoreHandle::Snapshot {
                    store,
                    path: path.to_path_buf(),
                })
            }
            None => {
                let store = AirtableStore::new(&config.store)?;
                println!("{} Using {}", style("→").cyan(), style(store.describe()).bold());
                Ok(StoreHandle::Airtable(store))
            }
        }
    }

    pub fn store(&self) -> &dyn TableStore {
        match self {
            StoreHandle::Airtable(store) => store,
            StoreHandle::Snapshot { store, .. } => store,
        }
    }

    /// Persist snapshot changes. Dry runs leave the file untouched.
    pub async fn finish(&self, dry_run: bool) -> anyhow::Result<()> {
        if let StoreHandle::Snapshot { store, path } = self {
            if !dry_run {
                store.save(path).await?;
                println!(
                    "{} Snapshot written to {}",
                    style("✓").green(),
                    path.display()
                );
            }
        }
        Ok(())
    }
}

/// Run options from the config file with command-line overrides applied.
pub fn run_options(config: &MergeConfig, write: &WriteArgs) -> anyhow::Result<RunOptions> {
    let mut options = RunOptions::from_config(config);
    options.dry_run = write.dry_run(config.dry_run);
    options.show_progress = write.progress;
    if let Some(batch_size) = write.batch_size {
        if batch_size == 0 || batch_size > crate::config::MAX_BATCH_SIZE {
            anyhow::bail!(
                "--batch-size must be between 1 and {}",
                crate::config::MAX_BATCH_SIZE
            );
        }
        options.batch_size = batch_size;
    }
    Ok(options)
}

/// Print the dry-run banner, if applicable.
pub fn announce_mode(options: &RunOptions) {
    if options.dry_run {
        println!(
            "{} Dry run mode - no changes will be made (use --apply to write)",
            style("!").yellow()
        );
    }
    println!("  Batch size: {}", options.batch_size);
}
