//! In-memory table store.
//!
//! Holds whole tables in memory behind a mutex. Tables can be loaded from and
//! saved to a JSON snapshot file:
//!
//! ```json
//! {"tables": {"District-Table": {"fields": ["NCES-District-ID"], "records": []}}}
//! ```
//!
//! Every create/update call is recorded so callers can verify exactly which
//! writes a run performed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FieldInfo, NewRecord, Record, RecordUpdate, StoreError, TableStore};

/// A table held in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryTable {
    /// Known field names. Writes naming any other field are rejected.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub records: Vec<Record>,
}

impl MemoryTable {
    /// Add every field name used by a record to the schema.
    fn infer_fields(&mut self) {
        let mut known: BTreeSet<String> = self.fields.iter().cloned().collect();
        for record in &self.records {
            for name in record.fields.keys() {
                if known.insert(name.clone()) {
                    self.fields.push(name.clone());
                }
            }
        }
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    tables: BTreeMap<String, MemoryTable>,
}

/// A write performed against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Create { table: String, count: usize },
    Update { table: String, count: usize },
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    calls: Vec<WriteCall>,
    next_id: u64,
    failing_tables: BTreeSet<String>,
}

impl State {
    fn table(&self, name: &str) -> Result<&MemoryTable, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    /// Keep generated ids past every `rec{n}` id already held.
    fn reserve_ids(&mut self, records: &[Record]) {
        let highest = records.iter().filter_map(|r| id_number(&r.id)).max();
        if let Some(highest) = highest {
            self.next_id = self.next_id.max(highest);
        }
    }

    fn check_writable(&self, table: &str) -> Result<(), StoreError> {
        if self.failing_tables.contains(table) {
            return Err(StoreError::Api {
                table: table.to_string(),
                status: 503,
                message: "simulated write failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Numeric part of an id in the `rec{n}` form this store generates.
fn id_number(id: &str) -> Option<u64> {
    id.strip_prefix("rec")?.parse().ok()
}

fn check_fields<'a>(
    table_name: &str,
    table: &MemoryTable,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), StoreError> {
    for name in names {
        if !table.has_field(name) {
            return Err(StoreError::Api {
                table: table_name.to_string(),
                status: 422,
                message: format!("Unknown field name: \"{}\"", name),
            });
        }
    }
    Ok(())
}

/// Table store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table.
    pub fn with_table(self, name: &str, mut table: MemoryTable) -> Self {
        table.infer_fields();
        let mut state = self.lock();
        state.reserve_ids(&table.records);
        state.tables.insert(name.to_string(), table);
        drop(state);
        self
    }

    /// Add an empty table with the given schema.
    pub fn with_schema(self, name: &str, fields: &[&str]) -> Self {
        let table = MemoryTable {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            records: Vec::new(),
        };
        self.with_table(name, table)
    }

    /// Insert records directly, bypassing call recording.
    pub fn seed(&self, table: &str, records: Vec<Record>) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.reserve_ids(&records);
        let entry = state.table_mut(table)?;
        entry.records.extend(records);
        entry.infer_fields();
        Ok(())
    }

    /// Make every subsequent write to `table` fail.
    pub fn fail_writes_to(&self, table: &str) {
        self.lock().failing_tables.insert(table.to_string());
    }

    /// Load tables from a JSON snapshot file.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let snapshot: SnapshotFile = serde_json::from_str(&contents)?;
        debug!(
            "Loaded {} tables from snapshot {}",
            snapshot.tables.len(),
            path.display()
        );

        let mut store = Self::new();
        for (name, table) in snapshot.tables {
            store = store.with_table(&name, table);
        }
        Ok(store)
    }

    /// Write all tables to a JSON snapshot file.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = SnapshotFile {
            tables: self.lock().tables.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// All writes performed so far, in order.
    pub fn calls(&self) -> Vec<WriteCall> {
        self.lock().calls.clone()
    }

    /// Current records of a table.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn select_records(
        &self,
        table: &str,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, StoreError> {
        let state = self.lock();
        let records = &state.table(table)?.records;

        Ok(match fields {
            None => records.clone(),
            Some(names) => records
                .iter()
                .map(|r| {
                    let projected = r
                        .fields
                        .iter()
                        .filter(|(k, _)| names.contains(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    Record::new(r.id.clone(), projected)
                })
                .collect(),
        })
    }

    async fn get_field(&self, table: &str, field: &str) -> Result<Option<FieldInfo>, StoreError> {
        let state = self.lock();
        let table = state.table(table)?;
        Ok(table.has_field(field).then(|| FieldInfo::named(field)))
    }

    async fn create_records(
        &self,
        table: &str,
        records: &[NewRecord],
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock();
        state.check_writable(table)?;
        {
            let entry = state.table(table)?;
            for record in records {
                check_fields(table, entry, record.fields.keys())?;
            }
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            state.next_id += 1;
            let id = format!("rec{:014}", state.next_id);
            let created = Record::new(id.clone(), record.fields.clone());
            state.table_mut(table)?.records.push(created);
            ids.push(id);
        }

        state.calls.push(WriteCall::Create {
            table: table.to_string(),
            count: records.len(),
        });
        Ok(ids)
    }

    async fn update_records(
        &self,
        table: &str,
        updates: &[RecordUpdate],
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_writable(table)?;
        {
            let entry = state.table(table)?;
            for update in updates {
                check_fields(table, entry, update.fields.keys())?;
                if !entry.records.iter().any(|r| r.id == update.id) {
                    return Err(StoreError::UnknownRecord {
                        table: table.to_string(),
                        id: update.id.clone(),
                    });
                }
            }
        }

        let entry = state.table_mut(table)?;
        for update in updates {
            if let Some(record) = entry.records.iter_mut().find(|r| r.id == update.id) {
                for (name, value) in &update.fields {
                    record.fields.insert(name.clone(), value.clone());
                }
            }
        }

        state.calls.push(WriteCall::Update {
            table: table.to_string(),
            count: updates.len(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Fields;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let store = MemoryStore::new().with_schema("T", &["Key", "Name"]);

        let ids = store
            .create_records("T", &[NewRecord::new(fields(&[("Key", json!("1"))]))])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        store
            .update_records(
                "T",
                &[RecordUpdate::new(&ids[0], fields(&[("Name", json!("Acme"))]))],
            )
            .await
            .unwrap();

        let records = store.records("T");
        assert_eq!(records[0].get("Name"), Some(&json!("Acme")));
        assert_eq!(records[0].get("Key"), Some(&json!("1")));
        assert_eq!(
            store.calls(),
            vec![
                WriteCall::Create {
                    table: "T".into(),
                    count: 1
                },
                WriteCall::Update {
                    table: "T".into(),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_unknown_fields() {
        let store = MemoryStore::new().with_schema("T", &["Key"]);
        let err = store
            .create_records("T", &[NewRecord::new(fields(&[("Nope", json!(1))]))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 422, .. }));
        assert!(store.records("T").is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_select_with_projection() {
        let store = MemoryStore::new().with_table(
            "T",
            MemoryTable {
                fields: vec![],
                records: vec![Record::new(
                    "rec1",
                    fields(&[("Key", json!("1")), ("Name", json!("Acme"))]),
                )],
            },
        );

        let projection = vec!["Key".to_string()];
        let records = store.select_records("T", Some(&projection)).await.unwrap();
        assert_eq!(records[0].fields.len(), 1);
        assert!(store.get_field("T", "Name").await.unwrap().is_some());
        assert!(store.get_field("T", "Other").await.unwrap().is_none());
        assert!(matches!(
            store.select_records("Missing", None).await,
            Err(StoreError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.json");
        std::fs::write(
            &path,
            r#"{"tables": {"T": {"records": [{"id": "recA", "fields": {"Key": "1"}}]}}}"#,
        )
        .unwrap();

        let store = MemoryStore::load(&path).await.unwrap();
        assert!(store.get_field("T", "Key").await.unwrap().is_some());
        store
            .create_records("T", &[NewRecord::new(fields(&[("Key", json!("2"))]))])
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let reloaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(reloaded.records("T").len(), 2);
    }

    #[tokio::test]
    async fn test_ids_stay_unique_across_snapshot_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.json");
        std::fs::write(&path, r#"{"tables": {"T": {"fields": ["Key"]}}}"#).unwrap();

        let mut ids = Vec::new();
        for key in ["1", "2", "3"] {
            let store = MemoryStore::load(&path).await.unwrap();
            ids.extend(
                store
                    .create_records("T", &[NewRecord::new(fields(&[("Key", json!(key))]))])
                    .await
                    .unwrap(),
            );
            store.save(&path).await.unwrap();
        }

        let unique: BTreeSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 3);

        let reloaded = MemoryStore::load(&path).await.unwrap();
        let last = ids[2].clone();
        reloaded
            .update_records("T", &[RecordUpdate::new(&last, fields(&[("Key", json!("9"))]))])
            .await
            .unwrap();
        let keys: Vec<_> = reloaded
            .records("T")
            .iter()
            .map(|r| r.get("Key").cloned())
            .collect();
        assert_eq!(keys, vec![Some(json!("1")), Some(json!("2")), Some(json!("9"))]);
    }

    #[tokio::test]
    async fn test_seeded_ids_are_not_reissued() {
        let store = MemoryStore::new().with_schema("T", &["Key"]);
        store
            .seed("T", vec![Record::new("rec00000000000007", Fields::new())])
            .unwrap();
        let ids = store
            .create_records("T", &[NewRecord::new(fields(&[("Key", json!("1"))]))])
            .await
            .unwrap();
        assert_eq!(ids, vec!["rec00000000000008".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_table() {
        let store = MemoryStore::new().with_schema("T", &["Key"]);
        store.fail_writes_to("T");
        let result = store
            .create_records("T", &[NewRecord::new(fields(&[("Key", json!("1"))]))])
            .await;
        assert!(result.is_err());
    }
}
