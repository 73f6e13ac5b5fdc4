//! Schema check: confirm every configured field exists before a run.

use std::fmt;

use crate::config::MergeConfig;
use crate::store::{StoreError, TableStore};

/// One configured field or role that the store does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaProblem {
    pub role: String,
    pub table: String,
    pub field: String,
    /// Where the field is referenced ("unique field", "mapped field", ...).
    pub usage: &'static str,
}

impl fmt::Display for SchemaProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} '{}' not found in table '{}'",
            self.role, self.usage, self.field, self.table
        )
    }
}

fn expect(table: &str, field: &str, usage: &'static str) -> (String, String, &'static str) {
    (table.to_string(), field.to_string(), usage)
}

/// Check every table of `config` against the store schema.
///
/// All problems are collected; only store failures abort the check.
pub async fn check_schema(
    store: &dyn TableStore,
    config: &MergeConfig,
) -> Result<Vec<SchemaProblem>, StoreError> {
    let mut problems = Vec::new();

    for table in &config.tables {
        let mut wanted = vec![
            expect(&table.source, &table.unique_field, "unique field"),
            expect(&table.target, &table.unique_field, "unique field"),
        ];
        for field in &table.fields {
            wanted.push(expect(&table.source, field, "mapped field"));
            wanted.push(expect(&table.target, field, "mapped field"));
        }
        if let Some(ref rule) = table.append {
            wanted.push(expect(&table.target, &rule.field, "append field"));
        }
        for linkage in &table.linkages {
            wanted.push(expect(&table.source, &linkage.source_field, "link source field"));
            wanted.push(expect(&table.target, &linkage.target_field, "link target field"));
            if config.table(&linkage.link_to).is_none() {
                problems.push(SchemaProblem {
                    role: table.role.clone(),
                    table: table.target.clone(),
                    field: linkage.link_to.clone(),
                    usage: "linked role",
                });
            }
        }
        if let Some(ref name_field) = table.name_field {
            wanted.push(expect(&table.target, name_field, "name field"));
        }

        for (table_name, field, usage) in wanted {
            let found = match store.get_field(&table_name, &field).await {
                Ok(info) => info.is_some(),
                Err(StoreError::UnknownTable(_)) => false,
                Err(e) => return Err(e),
            };
            if !found {
                problems.push(SchemaProblem {
                    role: table.role.clone(),
                    table: table_name,
                    field,
                    usage,
                });
            }
        }
    }

    Ok(problems)
}
