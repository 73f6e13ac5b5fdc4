//! Load CSV exports into a staging table.
//!
//! Columns are renamed to table fields through the `[staging]` configuration,
//! rows are deduplicated on the key column (first row wins), and blank cells
//! are left out of the created records. Fields listed under `[staging.derived]`
//! are computed per row after the renamed columns.

mod derived;

pub use derived::school_level;

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::StagingConfig;
use crate::migrate::batch::{maybe_progress, BatchWriter};
use crate::migrate::report::{StageReport, SummaryRow, SAMPLE_LIMIT};
use crate::migrate::snapshot::require_fields;
use crate::migrate::{MigrateError, RunOptions, MISSING_ID};
use crate::store::{Fields, NewRecord, TableStore};
use derived::Deriver;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("Key column '{0}' not found in CSV header")]
    MissingKeyColumn(String),
    #[error("Column '{column}' used by derived field '{field}' not found in CSV header")]
    UnknownColumn { field: String, column: String },
    #[error("Invalid template for derived field '{field}': {message}")]
    Template { field: String, message: String },
    #[error(transparent)]
    Migrate(#[from] MigrateError),
}

/// Options for one staging load.
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    /// Staging table to create records in.
    pub table: String,
    /// Keep columns that have no entry in the column map, under their CSV name.
    pub keep_unmapped: bool,
}

/// Rows read from a CSV export, ready to create.
#[derive(Debug, Clone, Default)]
pub struct StagedRows {
    /// Field names in header order.
    pub fields: Vec<String>,
    pub records: Vec<NewRecord>,
    /// Key of each record, or the 1-based row number when no key column is set.
    pub keys: Vec<String>,
    /// Rows dropped for a repeated or blank key.
    pub skipped: Vec<String>,
}

/// Read CSV rows and map them onto table fields.
pub fn read_csv<R: Read>(
    reader: R,
    staging: &StagingConfig,
    keep_unmapped: bool,
) -> Result<StagedRows, StageError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv.headers()?.clone();

    // Output field name per column, None for dropped columns.
    let targets: Vec<Option<String>> = headers
        .iter()
        .map(|column| match staging.columns.get(column) {
            Some(field) => Some(field.clone()),
            None if keep_unmapped => Some(column.to_string()),
            None => None,
        })
        .collect();

    let key_index = match staging.key_column {
        Some(ref key) => Some(
            headers
                .iter()
                .position(|h| h == key)
                .ok_or_else(|| StageError::MissingKeyColumn(key.clone()))?,
        ),
        None => None,
    };

    let derivers = staging
        .derived
        .iter()
        .map(|(field, column)| -> Result<_, StageError> {
            Ok((field.clone(), Deriver::resolve(field, column, &headers)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut staged = StagedRows {
        fields: targets.iter().flatten().cloned().collect(),
        ..Default::default()
    };
    for (field, _) in &derivers {
        if !staged.fields.contains(field) {
            staged.fields.push(field.clone());
        }
    }
    let mut seen = HashSet::new();

    for (row_number, row) in csv.records().enumerate() {
        let row = row?;

        let key = match key_index {
            Some(index) => {
                let key = row.get(index).map(str::trim).unwrap_or_default();
                if key.is_empty() {
                    staged.skipped.push(MISSING_ID.to_string());
                    continue;
                }
                if !seen.insert(key.to_string()) {
                    debug!("Dropping repeated row for key {}", key);
                    staged.skipped.push(key.to_string());
                    continue;
                }
                key.to_string()
            }
            None => (row_number + 1).to_string(),
        };

        let mut fields = Fields::new();
        for (cell, target) in row.iter().zip(&targets) {
            let Some(field) = target else { continue };
            let cell = cell.trim();
            if !cell.is_empty() {
                fields.insert(field.clone(), cell.into());
            }
        }
        for (field, deriver) in &derivers {
            if let Some(value) = deriver.derive(&row) {
                fields.insert(field.clone(), value.into());
            }
        }

        staged.records.push(NewRecord::new(fields));
        staged.keys.push(key);
    }

    Ok(staged)
}

/// Create records in a staging table from a CSV file.
pub async fn stage_csv(
    store: &dyn TableStore,
    path: &Path,
    staging: &StagingConfig,
    stage: &StageOptions,
    options: &RunOptions,
) -> Result<StageReport, StageError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|source| StageError::Open {
            path: path.display().to_string(),
            source,
        })?;
    let staged = read_csv(contents.as_slice(), staging, stage.keep_unmapped)?;
    info!(
        table = %stage.table,
        rows = staged.records.len(),
        skipped = staged.skipped.len(),
        "Read {}",
        path.display()
    );

    require_fields(store, &stage.table, &staged.fields).await?;

    let progress = maybe_progress(
        options.show_progress && !options.dry_run,
        staged.records.len(),
        &stage.table,
    );
    let mut writer = BatchWriter::new(store, &stage.table, options.batch_size, options.dry_run)
        .with_progress(progress);
    for record in staged.records {
        writer.push(record).await?;
    }
    let stats = writer.finish().await?;

    Ok(StageReport {
        stage: "Stage",
        table: stage.table.clone(),
        dry_run: options.dry_run,
        rows: vec![
            SummaryRow::new("Planned to Stage", &stage.table, &staged.keys, SAMPLE_LIMIT),
            SummaryRow::new("Skipped", &stage.table, &staged.skipped, SAMPLE_LIMIT),
        ],
        written: stats.written,
    })
}
