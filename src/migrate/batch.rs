//! Batched writes with dry-run support.

use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, error};

use super::MigrateError;
use crate::store::{NewRecord, RecordUpdate, StoreError, TableStore};

/// A record payload that can be written to a store in batches.
#[async_trait]
pub trait BatchItem: Serialize + Send + Sync + Sized {
    /// Verb used in log messages ("create", "update").
    const ACTION: &'static str;

    async fn write(store: &dyn TableStore, table: &str, batch: &[Self]) -> Result<(), StoreError>;
}

#[async_trait]
impl BatchItem for NewRecord {
    const ACTION: &'static str = "create";

    async fn write(store: &dyn TableStore, table: &str, batch: &[Self]) -> Result<(), StoreError> {
        store.create_records(table, batch).await.map(|_| ())
    }
}

#[async_trait]
impl BatchItem for RecordUpdate {
    const ACTION: &'static str = "update";

    async fn write(store: &dyn TableStore, table: &str, batch: &[Self]) -> Result<(), StoreError> {
        store.update_records(table, batch).await
    }
}

/// Write one batch. On failure the error is logged with the offending
/// payload and returned unchanged.
pub async fn safe_write<T: BatchItem>(
    store: &dyn TableStore,
    table: &str,
    batch: &[T],
) -> Result<(), MigrateError> {
    match T::write(store, table, batch).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(table = %table, records = batch.len(), "Batch {} failed: {}", T::ACTION, e);
            debug!(
                "Failed batch payload: {}",
                serde_json::to_string(batch).unwrap_or_else(|_| "<unserializable>".into())
            );
            Err(e.into())
        }
    }
}

/// Create a progress bar for batch writes, if enabled.
pub fn maybe_progress(show: bool, total: usize, label: &str) -> Option<ProgressBar> {
    if !show || total == 0 {
        return None;
    }

    let pb = ProgressBar::new(total as u64);
    // The template is a constant; fall back to the default style if it is ever rejected.
    let style = ProgressStyle::default_bar()
        .template("  {prefix:>20} [{bar:40.cyan/dim}] {pos}/{len} ({per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(label.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Counts reported when a writer finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Records handed to the writer.
    pub queued: usize,
    /// Records actually sent to the store (zero in dry-run).
    pub written: usize,
    /// Store calls made.
    pub batches: usize,
}

/// Accumulates records and flushes them to the store every `batch_size` items.
///
/// In dry-run mode nothing is ever sent; records are only counted.
pub struct BatchWriter<'a, T: BatchItem> {
    store: &'a dyn TableStore,
    table: String,
    batch_size: usize,
    dry_run: bool,
    pending: Vec<T>,
    stats: BatchStats,
    progress: Option<ProgressBar>,
}

impl<'a, T: BatchItem> BatchWriter<'a, T> {
    pub fn new(store: &'a dyn TableStore, table: &str, batch_size: usize, dry_run: bool) -> Self {
        Self {
            store,
            table: table.to_string(),
            batch_size: batch_size.max(1),
            dry_run,
            pending: Vec::new(),
            stats: BatchStats::default(),
            progress: None,
        }
    }

    /// Attach a progress bar advanced as batches are written.
    pub fn with_progress(mut self, progress: Option<ProgressBar>) -> Self {
        self.progress = progress;
        self
    }

    /// Queue a record, flushing when a full batch has accumulated.
    pub async fn push(&mut self, item: T) -> Result<(), MigrateError> {
        self.stats.queued += 1;
        if self.dry_run {
            return Ok(());
        }

        self.pending.push(item);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), MigrateError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        safe_write(self.store, &self.table, &batch).await?;
        self.stats.written += batch.len();
        self.stats.batches += 1;
        if let Some(ref pb) = self.progress {
            pb.inc(batch.len() as u64);
        }
        Ok(())
    }

    /// Flush the remaining partial batch and return the final counts.
    pub async fn finish(mut self) -> Result<BatchStats, MigrateError> {
        self.flush().await?;
        if let Some(pb) = self.progress.take() {
            pb.finish();
        }
        Ok(self.stats)
    }
}
