//! Copy stage: create canonical records for staging keys not yet present.

use tracing::info;

use super::batch::{maybe_progress, BatchWriter};
use super::report::{StageReport, SummaryRow, SAMPLE_LIMIT};
use super::snapshot::{require_fields, TableSnapshot};
use super::value::{is_defined, map_cell_value};
use super::{MigrateError, RunOptions};
use crate::config::TableConfig;
use crate::store::{Fields, NewRecord, TableStore};

/// Placeholder shown for staging records without a key.
pub const MISSING_ID: &str = "(Missing ID)";

/// Records to create, plus the keys planned and skipped.
#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    pub creates: Vec<NewRecord>,
    pub planned: Vec<String>,
    pub skipped: Vec<String>,
}

/// Decide which staging records to create in the target.
///
/// A record is skipped when its key is missing or already present, either in
/// the target snapshot or earlier in this plan.
pub fn plan_copy(source: &TableSnapshot, target: &TableSnapshot, table: &TableConfig) -> CopyPlan {
    let unique = &table.unique_field;
    let mut existing = target.keys();
    let mut plan = CopyPlan::default();

    for record in source.records() {
        let key = match record.key(unique) {
            Some(key) if !existing.contains(&key) => key,
            Some(key) => {
                plan.skipped.push(key);
                continue;
            }
            None => {
                plan.skipped.push(MISSING_ID.to_string());
                continue;
            }
        };

        let mut fields = Fields::new();
        if let Some(raw) = record.get(unique) {
            fields.insert(unique.clone(), raw.clone());
        }
        for name in &table.fields {
            if let Some(value) = record.get(name) {
                let mapped = map_cell_value(value);
                if is_defined(Some(&mapped)) {
                    fields.insert(name.clone(), mapped);
                }
            }
        }

        plan.creates.push(NewRecord::new(fields));
        plan.planned.push(key.clone());
        existing.insert(key);
    }

    plan
}

/// Copy staging records whose key is not yet in the target.
pub async fn copy_new_records(
    store: &dyn TableStore,
    source: &TableSnapshot,
    target: &TableSnapshot,
    table: &TableConfig,
    options: &RunOptions,
) -> Result<StageReport, MigrateError> {
    require_fields(store, &table.source, &table.fields).await?;

    let plan = plan_copy(source, target, table);
    info!(
        table = %table.role,
        planned = plan.planned.len(),
        skipped = plan.skipped.len(),
        "Copy plan ready"
    );

    let progress = maybe_progress(
        options.show_progress && !options.dry_run,
        plan.creates.len(),
        &table.role,
    );
    let mut writer = BatchWriter::new(store, &table.target, options.batch_size, options.dry_run)
        .with_progress(progress);
    for record in plan.creates {
        writer.push(record).await?;
    }
    let stats = writer.finish().await?;

    Ok(StageReport {
        stage: "Copy",
        table: table.role.clone(),
        dry_run: options.dry_run,
        rows: vec![
            SummaryRow::new("Planned to Copy", &table.role, &plan.planned, SAMPLE_LIMIT),
            SummaryRow::new("Skipped", &table.role, &plan.skipped, SAMPLE_LIMIT),
        ],
        written: stats.written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Record};
    use serde_json::{json, Value};

    fn table() -> TableConfig {
        TableConfig {
            role: "districts".into(),
            source: "NCES-District-Import".into(),
            target: "District-Table".into(),
            unique_field: "NCES-District-ID".into(),
            name_field: None,
            merge_existing: false,
            fields: vec!["District-Name".into(), "District-Logo".into()],
            append: None,
            linkages: vec![],
        }
    }

    fn record(id: &str, value: Value) -> Record {
        Record::new(id, value.as_object().cloned().unwrap_or_default())
    }

    fn snapshot(table: &str, records: Vec<Record>) -> TableSnapshot {
        TableSnapshot::new(table, "NCES-District-ID", records)
    }

    #[test]
    fn test_plan_skips_missing_existing_and_repeated_keys() {
        let source = snapshot(
            "src",
            vec![
                record("s1", json!({"NCES-District-ID": "001", "District-Name": "Acme"})),
                record("s2", json!({"NCES-District-ID": "002", "District-Name": "Beta"})),
                record("s3", json!({"District-Name": "No Key"})),
                record("s4", json!({"NCES-District-ID": "002", "District-Name": "Beta Again"})),
                record("s5", json!({"NCES-District-ID": "003"})),
            ],
        );
        let target = snapshot("dst", vec![record("t1", json!({"NCES-District-ID": "001"}))]);

        let plan = plan_copy(&source, &target, &table());
        assert_eq!(plan.planned, vec!["002", "003"]);
        assert_eq!(plan.skipped, vec!["001", MISSING_ID, "002"]);
        assert_eq!(
            Value::Object(plan.creates[0].fields.clone()),
            json!({"NCES-District-ID": "002", "District-Name": "Beta"})
        );
        // Undefined mapped fields are left out entirely.
        assert_eq!(
            Value::Object(plan.creates[1].fields.clone()),
            json!({"NCES-District-ID": "003"})
        );
    }

    #[test]
    fn test_plan_maps_values() {
        let source = snapshot(
            "src",
            vec![record(
                "s1",
                json!({
                    "NCES-District-ID": "001",
                    "District-Logo": [{"id": "att1", "url": "https://x/logo.png", "size": 3}],
                    "Unmapped": "ignored"
                }),
            )],
        );
        let target = snapshot("dst", vec![]);

        let plan = plan_copy(&source, &target, &table());
        assert_eq!(
            Value::Object(plan.creates[0].fields.clone()),
            json!({"NCES-District-ID": "001", "District-Logo": [{"url": "https://x/logo.png"}]})
        );
    }

    #[tokio::test]
    async fn test_missing_source_field_aborts_before_writes() {
        let store = MemoryStore::new()
            .with_schema("NCES-District-Import", &["NCES-District-ID", "District-Name"])
            .with_schema("District-Table", &["NCES-District-ID", "District-Name", "District-Logo"]);
        let source = snapshot(
            "NCES-District-Import",
            vec![record("s1", json!({"NCES-District-ID": "001"}))],
        );
        let target = snapshot("District-Table", vec![]);
        let options = RunOptions {
            dry_run: false,
            batch_size: 50,
            show_progress: false,
        };

        let err = copy_new_records(&store, &source, &target, &table(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::MissingField { ref field, .. } if field == "District-Logo"));
        assert!(store.calls().is_empty());
    }
}
