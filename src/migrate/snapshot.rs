//! Immutable table snapshots with a natural-key index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use super::MigrateError;
use crate::store::{Record, TableStore};

/// Full contents of a table, read once and indexed by a natural key.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    table: String,
    key_field: String,
    records: Vec<Record>,
    index: HashMap<String, usize>,
    duplicate_keys: Vec<String>,
}

impl TableSnapshot {
    /// Build a snapshot from records already in memory.
    ///
    /// When several records share a key the first one wins; the others are
    /// reported through [`TableSnapshot::duplicate_keys`].
    pub fn new(table: &str, key_field: &str, records: Vec<Record>) -> Self {
        let mut index = HashMap::with_capacity(records.len());
        let mut duplicate_keys = Vec::new();

        for (pos, record) in records.iter().enumerate() {
            if let Some(key) = record.key(key_field) {
                if index.contains_key(&key) {
                    duplicate_keys.push(key);
                } else {
                    index.insert(key, pos);
                }
            }
        }

        Self {
            table: table.to_string(),
            key_field: key_field.to_string(),
            records,
            index,
            duplicate_keys,
        }
    }

    /// Read a table from the store and index it by `key_field`.
    pub async fn load(
        store: &dyn TableStore,
        table: &str,
        key_field: &str,
        fields: Option<&[String]>,
    ) -> Result<Self, MigrateError> {
        let records = store.select_records(table, fields).await?;
        let snapshot = Self::new(table, key_field, records);

        info!(
            "Loaded {} records ({} keys) from {}",
            snapshot.records.len(),
            snapshot.index.len(),
            table
        );
        if !snapshot.duplicate_keys.is_empty() {
            warn!(
                table = %table,
                key_field = %key_field,
                count = snapshot.duplicate_keys.len(),
                sample = ?snapshot.duplicate_keys.iter().take(5).collect::<Vec<_>>(),
                "Duplicate keys in table; the first record with each key is used"
            );
        }
        Ok(snapshot)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record holding `key`, if any.
    pub fn find(&self, key: &str) -> Option<&Record> {
        self.index.get(key).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Every distinct key present in the table.
    pub fn keys(&self) -> HashSet<String> {
        self.index.keys().cloned().collect()
    }

    /// Keys held by more than one record (second and later occurrences).
    pub fn duplicate_keys(&self) -> &[String] {
        &self.duplicate_keys
    }
}

/// Snapshots shared between the stages of one phase, keyed by table and key field.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: HashMap<(String, String), Arc<TableSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached snapshot of `table`, reading it on first use.
    pub async fn get(
        &mut self,
        store: &dyn TableStore,
        table: &str,
        key_field: &str,
    ) -> Result<Arc<TableSnapshot>, MigrateError> {
        let cache_key = (table.to_string(), key_field.to_string());
        if let Some(snapshot) = self.snapshots.get(&cache_key) {
            return Ok(Arc::clone(snapshot));
        }

        let snapshot = Arc::new(TableSnapshot::load(store, table, key_field, None).await?);
        self.snapshots.insert(cache_key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Fail with [`MigrateError::MissingField`] unless every field exists in `table`.
pub async fn require_fields<'a>(
    store: &dyn TableStore,
    table: &str,
    fields: impl IntoIterator<Item = &'a String>,
) -> Result<(), MigrateError> {
    for field in fields {
        if store.get_field(table, field).await?.is_none() {
            tracing::error!("Field '{}' not found in table '{}'", field, table);
            return Err(MigrateError::MissingField {
                table: table.to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}
