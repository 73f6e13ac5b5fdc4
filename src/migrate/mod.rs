//! Staging-to-canonical table migration.
//!
//! A run reads each staging table and its canonical counterpart once, fills
//! empty fields of records that already exist, creates the missing ones, and
//! finally rebuilds reference fields from textual key lists.

pub mod batch;
pub mod check;
pub mod copy;
mod error;
pub mod merge;
pub mod pipeline;
pub mod relink;
pub mod report;
pub mod snapshot;
pub mod value;

pub use batch::{BatchStats, BatchWriter};
pub use check::{check_schema, SchemaProblem};
pub use copy::{copy_new_records, plan_copy, CopyPlan, MISSING_ID};
pub use error::MigrateError;
pub use merge::{merge_existing_records, plan_merge, PlannedUpdate};
pub use pipeline::{Phases, Pipeline};
pub use relink::{parse_link_tokens, plan_links, relink_table, PlannedLink};
pub use report::{StageReport, SummaryRow};
pub use snapshot::{SnapshotCache, TableSnapshot};
pub use value::{classify, map_cell_value, CellShape};

use crate::config::MergeConfig;

/// Settings shared by every stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Plan and report without writing.
    pub dry_run: bool,
    pub batch_size: usize,
    /// Draw progress bars while writing.
    pub show_progress: bool,
}

impl RunOptions {
    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            batch_size: config.batch_size,
            show_progress: false,
        }
    }
}
