//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod check;
mod config_cmd;
mod helpers;
mod migrate;
mod stage;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{load_config, LoadOptions};
use crate::migrate::Phases;

#[derive(Parser)]
#[command(name = "tablemerge")]
#[command(about = "Merge staging tables into canonical tables and rebuild their links")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "TABLEMERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use a local JSON snapshot of the base instead of the API
    #[arg(long, global = true, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Options shared by every command that writes records.
#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Write changes (overrides `dry_run` in the config file)
    #[arg(long, conflicts_with = "dry_run")]
    apply: bool,

    /// Only plan and report, never write
    #[arg(long)]
    dry_run: bool,

    /// Records per create/update call (1-50)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Show progress bars while writing
    #[arg(short = 'P', long)]
    progress: bool,
}

impl WriteArgs {
    /// Dry-run flag after applying command-line overrides.
    fn dry_run(&self, configured: bool) -> bool {
        if self.apply {
            false
        } else if self.dry_run {
            true
        } else {
            configured
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge, copy and relink every configured table
    Run {
        #[command(flatten)]
        write: WriteArgs,
        /// Restrict to these table roles (repeatable)
        #[arg(short, long = "table", value_name = "ROLE")]
        tables: Vec<String>,
        /// Skip the link phase
        #[arg(long, conflicts_with = "only_link")]
        skip_link: bool,
        /// Run only the link phase
        #[arg(long)]
        only_link: bool,
    },

    /// Merge and copy records without relinking
    Copy {
        #[command(flatten)]
        write: WriteArgs,
        /// Restrict to these table roles (repeatable)
        #[arg(short, long = "table", value_name = "ROLE")]
        tables: Vec<String>,
    },

    /// Rebuild reference fields from textual key lists
    Link {
        #[command(flatten)]
        write: WriteArgs,
        /// Restrict to these table roles (repeatable)
        #[arg(short, long = "table", value_name = "ROLE")]
        tables: Vec<String>,
    },

    /// Verify that every configured field exists in the base
    Check,

    /// Load a CSV export into a staging table
    Stage {
        /// CSV file to load
        file: PathBuf,
        /// Staging table to create records in
        #[arg(short, long)]
        table: String,
        /// Keep CSV columns missing from the column map
        #[arg(long)]
        keep_unmapped: bool,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Print the resolved configuration as TOML
    Config,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
    };
    let config = load_config(&options).await?;
    let snapshot = cli.snapshot.as_deref();

    match cli.command {
        Commands::Run {
            write,
            tables,
            skip_link,
            only_link,
        } => {
            let phases = if only_link {
                Phases::LINK_ONLY
            } else if skip_link {
                Phases::COPY_ONLY
            } else {
                Phases::ALL
            };
            migrate::cmd_migrate(&config, snapshot, &write, &tables, phases).await
        }
        Commands::Copy { write, tables } => {
            migrate::cmd_migrate(&config, snapshot, &write, &tables, Phases::COPY_ONLY).await
        }
        Commands::Link { write, tables } => {
            migrate::cmd_migrate(&config, snapshot, &write, &tables, Phases::LINK_ONLY).await
        }
        Commands::Check => check::cmd_check(&config, snapshot).await,
        Commands::Stage {
            file,
            table,
            keep_unmapped,
            write,
        } => stage::cmd_stage(&config, snapshot, &file, &table, keep_unmapped, &write).await,
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "tablemerge",
            "run",
            "--apply",
            "--table",
            "districts",
            "-t",
            "schools",
            "--skip-link",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                write,
                tables,
                skip_link,
                only_link,
            } => {
                assert!(!write.dry_run(true));
                assert_eq!(tables, vec!["districts", "schools"]);
                assert!(skip_link);
                assert!(!only_link);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_dry_run_defaults_to_config() {
        let cli = Cli::try_parse_from(["tablemerge", "copy"]).unwrap();
        match cli.command {
            Commands::Copy { write, .. } => {
                assert!(write.dry_run(true));
                assert!(!write.dry_run(false));
            }
            _ => panic!("expected copy"),
        }
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        assert!(Cli::try_parse_from(["tablemerge", "run", "--apply", "--dry-run"]).is_err());
        assert!(
            Cli::try_parse_from(["tablemerge", "run", "--skip-link", "--only-link"]).is_err()
        );
    }

    #[test]
    fn test_global_snapshot_flag() {
        let cli =
            Cli::try_parse_from(["tablemerge", "check", "--snapshot", "base.json", "-v"]).unwrap();
        assert_eq!(cli.snapshot, Some(PathBuf::from("base.json")));
        assert!(cli.verbose);
    }
}
