//! Run orchestration: the copy phase for every selected table, then the
//! link phase.

use tracing::info;

use super::copy::copy_new_records;
use super::merge::merge_existing_records;
use super::relink::relink_table;
use super::report::StageReport;
use super::snapshot::{require_fields, SnapshotCache, TableSnapshot};
use super::{MigrateError, RunOptions};
use crate::config::{MergeConfig, TableConfig};
use crate::store::TableStore;

/// Which phases of a run to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub copy: bool,
    pub link: bool,
}

impl Phases {
    pub const ALL: Phases = Phases {
        copy: true,
        link: true,
    };
    pub const COPY_ONLY: Phases = Phases {
        copy: true,
        link: false,
    };
    pub const LINK_ONLY: Phases = Phases {
        copy: false,
        link: true,
    };
}

type ReportHook<'a> = Box<dyn Fn(&StageReport) + Send + Sync + 'a>;

/// Sequential migration over the configured tables.
pub struct Pipeline<'a> {
    store: &'a dyn TableStore,
    config: &'a MergeConfig,
    options: RunOptions,
    on_report: Option<ReportHook<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn TableStore, config: &'a MergeConfig, options: RunOptions) -> Self {
        Self {
            store,
            config,
            options,
            on_report: None,
        }
    }

    /// Call `hook` with every stage report as soon as the stage finishes.
    pub fn on_report(mut self, hook: impl Fn(&StageReport) + Send + Sync + 'a) -> Self {
        self.on_report = Some(Box::new(hook));
        self
    }

    fn emit(&self, report: StageReport, reports: &mut Vec<StageReport>) {
        if let Some(ref hook) = self.on_report {
            hook(&report);
        }
        reports.push(report);
    }

    /// Run the selected phases over `tables`, in configured order.
    ///
    /// Any error aborts the run; batches already written stay applied.
    pub async fn run(
        &self,
        tables: &[&TableConfig],
        phases: Phases,
    ) -> Result<Vec<StageReport>, MigrateError> {
        let mut reports = Vec::new();
        info!(
            tables = tables.len(),
            dry_run = self.options.dry_run,
            batch_size = self.options.batch_size,
            "Starting migration"
        );

        if phases.copy {
            for table in tables {
                self.copy_table(table, &mut reports).await?;
            }
        }

        if phases.link {
            // Target tables are read again so records created above are visible.
            let mut cache = SnapshotCache::new();
            for table in tables.iter().filter(|t| !t.linkages.is_empty()) {
                let report =
                    relink_table(self.store, self.config, table, &mut cache, &self.options).await?;
                self.emit(report, &mut reports);
            }
        }

        info!(stages = reports.len(), "Migration finished");
        Ok(reports)
    }

    /// Merge (when enabled) then copy one table, sharing one pair of snapshots.
    async fn copy_table(
        &self,
        table: &TableConfig,
        reports: &mut Vec<StageReport>,
    ) -> Result<(), MigrateError> {
        info!("Copying {} -> {}", table.source, table.target);
        let unique = [&table.unique_field];
        require_fields(self.store, &table.source, unique).await?;
        require_fields(self.store, &table.target, unique).await?;

        let source =
            TableSnapshot::load(self.store, &table.source, &table.unique_field, None).await?;
        let target =
            TableSnapshot::load(self.store, &table.target, &table.unique_field, None).await?;

        if table.merge_existing {
            let report =
                merge_existing_records(self.store, &source, &target, table, &self.options).await?;
            self.emit(report, reports);
        }

        let report = copy_new_records(self.store, &source, &target, table, &self.options).await?;
        self.emit(report, reports);
        Ok(())
    }
}
