//! Table store abstraction.
//!
//! The migration stages only ever talk to a [`TableStore`]: enumerate the
//! records of a table, look up a field by name, and create or update records
//! in batches. [`AirtableStore`] talks to the hosted REST API;
//! [`MemoryStore`] keeps tables in memory and can round-trip them through a
//! JSON snapshot file for offline rehearsals and tests.

mod airtable;
mod error;
mod memory;
mod record;

use async_trait::async_trait;

pub use airtable::{AirtableStore, MAX_RECORDS_PER_REQUEST};
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTable, WriteCall};
pub use record::{key_text, value_text, FieldInfo, Fields, NewRecord, Record, RecordUpdate};

/// Client interface to a hosted table store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Read every record of a table, optionally restricted to a subset of fields.
    async fn select_records(
        &self,
        table: &str,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Look up a field of a table by name.
    async fn get_field(&self, table: &str, field: &str) -> Result<Option<FieldInfo>, StoreError>;

    /// Create records, returning the new record ids in input order.
    async fn create_records(
        &self,
        table: &str,
        records: &[NewRecord],
    ) -> Result<Vec<String>, StoreError>;

    /// Update existing records by id.
    async fn update_records(&self, table: &str, updates: &[RecordUpdate])
        -> Result<(), StoreError>;
}
