//! Merge stage: fill empty fields of canonical records from staging data.

use serde_json::Value;
use tracing::{error, info};

use super::batch::{maybe_progress, BatchWriter};
use super::report::{sample, StageReport, SummaryRow};
use super::snapshot::{require_fields, TableSnapshot};
use super::value::{is_defined, map_cell_value};
use super::{MigrateError, RunOptions};
use crate::config::{AppendRule, TableConfig};
use crate::store::{value_text, Fields, RecordUpdate, TableStore};

/// Samples shown in the "Updated" row.
const UPDATE_SAMPLE_LIMIT: usize = 5;

/// A planned update of one existing target record.
#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    pub key: String,
    pub update: RecordUpdate,
}

impl PlannedUpdate {
    /// `KEY (fields: A, B)`, leaving out the unique field.
    pub fn summary(&self, unique_field: &str) -> String {
        let fields: Vec<&str> = self
            .update
            .fields
            .keys()
            .map(String::as_str)
            .filter(|f| *f != unique_field)
            .collect();
        format!("{} (fields: {})", self.key, fields.join(", "))
    }
}

/// Value for the append-rule field: `old, suffix`.
///
/// With `once` set, values already ending in the suffix are left alone.
fn appended(old: &Value, rule: &AppendRule) -> Option<Value> {
    let old = value_text(old);
    if rule.once && old.ends_with(&rule.suffix) {
        return None;
    }
    Some(Value::String(format!("{}, {}", old, rule.suffix)))
}

/// Plan updates for staging records whose key already exists in the target.
///
/// Target values that are already defined are never replaced, except for the
/// append-rule field, which gets the configured suffix appended.
pub fn plan_merge(
    source: &TableSnapshot,
    target: &TableSnapshot,
    table: &TableConfig,
) -> Result<Vec<PlannedUpdate>, MigrateError> {
    let unique = &table.unique_field;
    let existing = target.keys();
    let mut updates = Vec::new();

    for record in source.records() {
        let key = match record.key(unique) {
            Some(key) if existing.contains(&key) => key,
            _ => continue,
        };

        let target_record = target.find(&key).ok_or_else(|| {
            error!("Target record with ID '{}' not found", key);
            MigrateError::MissingTargetRecord {
                table: target.table().to_string(),
                field: unique.clone(),
                key: key.clone(),
            }
        })?;

        let mut fields = Fields::new();
        for name in &table.fields {
            let source_value = record.get(name);
            let target_value = target_record.get(name);

            if is_defined(source_value) && !is_defined(target_value) {
                if let Some(value) = source_value {
                    fields.insert(name.clone(), map_cell_value(value));
                }
            } else if let (Some(old), Some(rule)) = (target_value, table.append.as_ref()) {
                if rule.field == *name && is_defined(Some(old)) {
                    if let Some(value) = appended(old, rule) {
                        fields.insert(name.clone(), value);
                    }
                }
            }
        }

        if fields.is_empty() {
            continue;
        }
        if let Some(raw) = record.get(unique) {
            fields.insert(unique.clone(), raw.clone());
        }
        updates.push(PlannedUpdate {
            key,
            update: RecordUpdate::new(target_record.id.clone(), fields),
        });
    }

    Ok(updates)
}

/// Fill in missing fields on target records that already hold a staging key.
pub async fn merge_existing_records(
    store: &dyn TableStore,
    source: &TableSnapshot,
    target: &TableSnapshot,
    table: &TableConfig,
    options: &RunOptions,
) -> Result<StageReport, MigrateError> {
    require_fields(store, &table.source, &table.fields).await?;

    let updates = plan_merge(source, target, table)?;
    info!(table = %table.role, updates = updates.len(), "Merge plan ready");

    let summaries: Vec<String> = updates
        .iter()
        .map(|u| u.summary(&table.unique_field))
        .collect();

    let progress = maybe_progress(
        options.show_progress && !options.dry_run,
        updates.len(),
        &table.role,
    );
    let mut writer = BatchWriter::new(store, &table.target, options.batch_size, options.dry_run)
        .with_progress(progress);
    for planned in updates {
        writer.push(planned.update).await?;
    }
    let stats = writer.finish().await?;

    Ok(StageReport {
        stage: "Merge",
        table: table.role.clone(),
        dry_run: options.dry_run,
        rows: vec![SummaryRow {
            status: "Updated".to_string(),
            table: table.role.clone(),
            count: summaries.len(),
            sample: sample(&summaries, UPDATE_SAMPLE_LIMIT),
        }],
        written: stats.written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Record;
    use serde_json::json;

    fn table() -> TableConfig {
        TableConfig {
            role: "districts".into(),
            source: "NCES-District-Import".into(),
            target: "District-Table".into(),
            unique_field: "NCES-District-ID".into(),
            name_field: None,
            merge_existing: true,
            fields: vec!["District-Name".into(), "Data-Source-Date".into()],
            append: Some(AppendRule {
                field: "Data-Source-Date".into(),
                suffix: "NCES-November-2025".into(),
                once: false,
            }),
            linkages: vec![],
        }
    }

    fn record(id: &str, value: Value) -> Record {
        Record::new(id, value.as_object().cloned().unwrap_or_default())
    }

    fn snapshot(records: Vec<Record>) -> TableSnapshot {
        TableSnapshot::new("T", "NCES-District-ID", records)
    }

    #[test]
    fn test_fills_only_empty_fields() {
        let source = snapshot(vec![
            record("s1", json!({"NCES-District-ID": "001", "District-Name": "Acme"})),
            record("s2", json!({"NCES-District-ID": "002", "District-Name": "Beta"})),
            record("s3", json!({"NCES-District-ID": "009", "District-Name": "New"})),
        ]);
        let target = snapshot(vec![
            record("t1", json!({"NCES-District-ID": "001"})),
            record("t2", json!({"NCES-District-ID": "002", "District-Name": "Existing"})),
        ]);

        let updates = plan_merge(&source, &target, &table()).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update.id, "t1");
        assert_eq!(
            Value::Object(updates[0].update.fields.clone()),
            json!({"NCES-District-ID": "001", "District-Name": "Acme"})
        );
        assert_eq!(
            updates[0].summary("NCES-District-ID"),
            "001 (fields: District-Name)"
        );
    }

    #[test]
    fn test_append_rule_always_appends() {
        let source = snapshot(vec![record(
            "s1",
            json!({"NCES-District-ID": "001", "Data-Source-Date": "2025-11"}),
        )]);
        let target = snapshot(vec![record(
            "t1",
            json!({"NCES-District-ID": "001", "Data-Source-Date": "Manual-2024"}),
        )]);

        let updates = plan_merge(&source, &target, &table()).unwrap();
        assert_eq!(
            updates[0].update.fields["Data-Source-Date"],
            json!("Manual-2024, NCES-November-2025")
        );

        // A value that already carries the suffix still gets it again.
        let target = snapshot(vec![record(
            "t1",
            json!({"NCES-District-ID": "001", "Data-Source-Date": "NCES-November-2025"}),
        )]);
        let updates = plan_merge(&source, &target, &table()).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].update.fields["Data-Source-Date"],
            json!("NCES-November-2025, NCES-November-2025")
        );
    }

    #[test]
    fn test_append_once_skips_suffixed_values() {
        let mut config = table();
        if let Some(rule) = config.append.as_mut() {
            rule.once = true;
        }
        let source = snapshot(vec![record(
            "s1",
            json!({"NCES-District-ID": "001", "Data-Source-Date": "2025-11"}),
        )]);

        let target = snapshot(vec![record(
            "t1",
            json!({"NCES-District-ID": "001", "Data-Source-Date": "Manual-2024"}),
        )]);
        assert_eq!(plan_merge(&source, &target, &config).unwrap().len(), 1);

        let target = snapshot(vec![record(
            "t1",
            json!({"NCES-District-ID": "001", "Data-Source-Date": "Manual-2024, NCES-November-2025"}),
        )]);
        assert!(plan_merge(&source, &target, &config).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_target_keys_use_first_record() {
        let source = snapshot(vec![record(
            "s1",
            json!({"NCES-District-ID": "001", "District-Name": "Acme"}),
        )]);
        let target = snapshot(vec![
            record("t1", json!({"NCES-District-ID": "001"})),
            record("t2", json!({"NCES-District-ID": "001"})),
        ]);

        let updates = plan_merge(&source, &target, &table()).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update.id, "t1");
    }

    #[test]
    fn test_mapped_values_are_written() {
        let mut config = table();
        config.fields.push("District-Logo".into());
        let source = snapshot(vec![record(
            "s1",
            json!({"NCES-District-ID": "001", "District-Logo": [{"url": "https://x/a.png", "size": 1}]}),
        )]);
        let target = snapshot(vec![record("t1", json!({"NCES-District-ID": "001"}))]);

        let updates = plan_merge(&source, &target, &config).unwrap();
        assert_eq!(
            updates[0].update.fields["District-Logo"],
            json!([{"url": "https://x/a.png"}])
        );
    }
}
