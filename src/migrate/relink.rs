//! Relink stage: rebuild reference fields from textual key lists.
//!
//! Staging tables hold references as comma-separated natural keys ("A, B, C")
//! because record ids of the staging base mean nothing in the canonical one.
//! Each key is resolved against the canonical link-to table and the owning
//! record's reference field is replaced with the resolved ids.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::{error, info};

use super::batch::{maybe_progress, BatchWriter};
use super::report::{StageReport, SummaryRow, SAMPLE_LIMIT};
use super::snapshot::{require_fields, SnapshotCache, TableSnapshot};
use super::{MigrateError, RunOptions};
use crate::config::{Linkage, MergeConfig, TableConfig};
use crate::store::{value_text, Fields, RecordUpdate, TableStore};

/// Prefix of record ids invented for records that only exist in a dry run.
pub const DRY_RUN_ID_PREFIX: &str = "dry-run:";

fn dry_run_id(key: &str) -> String {
    format!("{}{}", DRY_RUN_ID_PREFIX, key)
}

/// Split a key list on commas, trimming whitespace and dropping empty and
/// repeated entries. Order of first occurrence is kept.
pub fn parse_link_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// A resolved reference to a record of the link-to table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    pub id: String,
    pub name: String,
}

/// Planned replacement of one owner's reference field.
#[derive(Debug, Clone)]
pub struct PlannedLink {
    pub owner_key: String,
    pub owner_id: String,
    pub references: Vec<LinkReference>,
}

impl PlannedLink {
    /// `OWNER ==> NAME, NAME`
    pub fn summary(&self) -> String {
        let names: Vec<&str> = self.references.iter().map(|r| r.name.as_str()).collect();
        format!("{} ==> {}", self.owner_key, names.join(", "))
    }

    /// Update writing the references into `target_field`.
    pub fn to_update(&self, target_field: &str) -> RecordUpdate {
        let ids: Vec<Value> = self
            .references
            .iter()
            .map(|r| json!({ "id": r.id }))
            .collect();
        let mut fields = Fields::new();
        fields.insert(target_field.to_string(), Value::Array(ids));
        RecordUpdate::new(self.owner_id.clone(), fields)
    }
}

/// Snapshots needed to plan one linkage.
pub struct LinkInputs<'a> {
    pub owner: &'a TableConfig,
    pub linkage: &'a Linkage,
    pub link_to: &'a TableConfig,
    pub owner_source: &'a TableSnapshot,
    pub owner_target: &'a TableSnapshot,
    pub link_target: &'a TableSnapshot,
    /// Link-to staging snapshot, consulted only in dry-run.
    pub link_source: Option<&'a TableSnapshot>,
}

/// Plan the reference updates for one linkage.
///
/// Every token of a record is validated before the record is planned, so an
/// unknown key aborts without queuing a partial update.
pub fn plan_links(inputs: &LinkInputs<'_>, dry_run: bool) -> Result<Vec<PlannedLink>, MigrateError> {
    let LinkInputs {
        owner,
        linkage,
        link_to,
        owner_source,
        owner_target,
        link_target,
        link_source,
    } = inputs;

    let mut valid = link_target.keys();
    if dry_run {
        if let Some(source) = link_source {
            valid.extend(source.keys());
        }
    }

    let mut planned = Vec::new();
    for record in owner_source.records() {
        let Some(owner_key) = record.key(&owner.unique_field) else {
            continue;
        };
        let tokens = record
            .get(&linkage.source_field)
            .map(|v| parse_link_tokens(&value_text(v)))
            .unwrap_or_default();
        if tokens.is_empty() {
            continue;
        }

        let owner_id = match owner_target.find(&owner_key) {
            Some(target) => target.id.clone(),
            None if dry_run => dry_run_id(&owner_key),
            None => {
                error!("Owner record with ID '{}' not found", owner_key);
                return Err(MigrateError::MissingTargetRecord {
                    table: owner_target.table().to_string(),
                    field: owner.unique_field.clone(),
                    key: owner_key,
                });
            }
        };

        if let Some(token) = tokens.iter().find(|t| !valid.contains(*t)) {
            error!(
                "Unknown {} '{}' in {} of '{}'",
                link_to.role, token, linkage.source_field, owner_key
            );
            return Err(MigrateError::UnknownLinkToken {
                owner: owner_key,
                field: linkage.source_field.clone(),
                token: token.clone(),
                link_to: link_to.role.clone(),
            });
        }

        let mut references = Vec::with_capacity(tokens.len());
        for token in tokens {
            let reference = match link_target.find(&token) {
                Some(target) => {
                    let name = link_to
                        .name_field
                        .as_deref()
                        .and_then(|f| target.get(f))
                        .map(value_text)
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| token.clone());
                    LinkReference {
                        id: target.id.clone(),
                        name,
                    }
                }
                None if dry_run => LinkReference {
                    id: dry_run_id(&token),
                    name: token,
                },
                None => {
                    return Err(MigrateError::MissingTargetRecord {
                        table: link_target.table().to_string(),
                        field: link_to.unique_field.clone(),
                        key: token,
                    });
                }
            };
            references.push(reference);
        }

        planned.push(PlannedLink {
            owner_key,
            owner_id,
            references,
        });
    }

    Ok(planned)
}

/// Rebuild every linkage of one table.
///
/// Snapshots come from `cache`, so tables shared between linkages are read
/// once per phase.
pub async fn relink_table(
    store: &dyn TableStore,
    config: &MergeConfig,
    table: &TableConfig,
    cache: &mut SnapshotCache,
    options: &RunOptions,
) -> Result<StageReport, MigrateError> {
    let mut rows = Vec::with_capacity(table.linkages.len());
    let mut written = 0;

    for linkage in &table.linkages {
        let link_to = config
            .table(&linkage.link_to)
            .ok_or_else(|| MigrateError::UnknownRole {
                owner: table.role.clone(),
                link_to: linkage.link_to.clone(),
            })?;

        require_fields(
            store,
            &table.source,
            [&table.unique_field, &linkage.source_field],
        )
        .await?;
        require_fields(store, &table.target, [&linkage.target_field]).await?;

        let owner_source = cache.get(store, &table.source, &table.unique_field).await?;
        let owner_target = cache.get(store, &table.target, &table.unique_field).await?;
        let link_target = cache.get(store, &link_to.target, &link_to.unique_field).await?;
        let link_source = if options.dry_run {
            Some(cache.get(store, &link_to.source, &link_to.unique_field).await?)
        } else {
            None
        };

        let inputs = LinkInputs {
            owner: table,
            linkage,
            link_to,
            owner_source: &owner_source,
            owner_target: &owner_target,
            link_target: &link_target,
            link_source: link_source.as_deref(),
        };
        let links = plan_links(&inputs, options.dry_run)?;
        info!(
            table = %table.role,
            field = %linkage.target_field,
            links = links.len(),
            "Link plan ready"
        );

        let summaries: Vec<String> = links.iter().map(PlannedLink::summary).collect();
        let progress = maybe_progress(
            options.show_progress && !options.dry_run,
            links.len(),
            &linkage.target_field,
        );
        let mut writer = BatchWriter::new(store, &table.target, options.batch_size, options.dry_run)
            .with_progress(progress);
        for link in &links {
            writer.push(link.to_update(&linkage.target_field)).await?;
        }
        written += writer.finish().await?.written;

        rows.push(SummaryRow::new(
            "Planned Links",
            &format!("{}.{}", table.role, linkage.target_field),
            &summaries,
            SAMPLE_LIMIT,
        ));
    }

    Ok(StageReport {
        stage: "Link",
        table: table.role.clone(),
        dry_run: options.dry_run,
        rows,
        written,
    })
}
