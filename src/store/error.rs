//! Table store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}) on table '{table}': {message}")]
    Api {
        table: String,
        status: u16,
        message: String,
    },
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Table not found: {0}")]
    UnknownTable(String),
    #[error("Record '{id}' not found in table '{table}'")]
    UnknownRecord { table: String, id: String },
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot format error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Store not configured: {0}")]
    NotConfigured(String),
}
