//! Migration error types.

use thiserror::Error;

use crate::store::StoreError;

/// Fatal conditions that abort a migration run.
///
/// Nothing here is retried: batches written before the failure stay applied.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A configured field does not exist in the table schema.
    #[error("Field '{field}' not found in table '{table}'")]
    MissingField { table: String, field: String },
    /// A record expected to exist (by natural key) is not in the table.
    #[error("Record with {field} '{key}' not found in table '{table}'")]
    MissingTargetRecord {
        table: String,
        field: String,
        key: String,
    },
    /// A textual link identifier does not match any record of the linked table.
    #[error("Unknown identifier '{token}' in {field} of record '{owner}' (expected a {link_to} key)")]
    UnknownLinkToken {
        owner: String,
        field: String,
        token: String,
        link_to: String,
    },
    /// A linkage names a role with no table configuration.
    #[error("Table '{owner}' links to unknown role '{link_to}'")]
    UnknownRole { owner: String, link_to: String },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl MigrateError {
    /// Whether this error points at the configuration rather than the data or the API.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MigrateError::MissingField { .. } | MigrateError::UnknownRole { .. }
        )
    }
}
