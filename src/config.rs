//! Configuration management for tablemerge using the prefer crate.
//!
//! A configuration file describes the base to connect to and, per table role,
//! which staging table is merged into which canonical table, the natural key,
//! the copied fields and the links to rebuild afterwards.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of records per create/update batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Largest batch the platform accepts in one scripted call.
pub const MAX_BATCH_SIZE: usize = 50;

/// Default Airtable API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.airtable.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection settings for the hosted table store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// API endpoint (default: https://api.airtable.com).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Base identifier (`app...`). Overridden by `AIRTABLE_BASE_ID`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_id: Option<String>,
    /// Personal access token. Overridden by `AIRTABLE_TOKEN` / `AIRTABLE_API_KEY`.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Delay before every API request, in milliseconds.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Let the platform coerce string values into typed cells.
    #[serde(default)]
    pub typecast: bool,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            base_id: None,
            token: None,
            request_delay_ms: default_request_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            typecast: false,
        }
    }
}

impl StoreConfig {
    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base_id) = env_opt("AIRTABLE_BASE_ID") {
            self.base_id = Some(base_id);
        }
        if let Some(token) = env_opt("AIRTABLE_TOKEN").or_else(|| env_opt("AIRTABLE_API_KEY")) {
            self.token = Some(token);
        }
        self
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Append-instead-of-skip rule for one field during the merge stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendRule {
    pub field: String,
    pub suffix: String,
    /// Skip values that already end with the suffix, so reruns do not stack it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub once: bool,
}

/// Rebuilds a reference field from a comma-separated list of natural keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linkage {
    /// Text field in the staging table holding the key list.
    pub source_field: String,
    /// Reference field in the canonical table to fill.
    pub target_field: String,
    /// Role of the table the keys point into.
    pub link_to: String,
}

/// One staging table merged into one canonical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Logical name used on the command line and by `link_to`.
    pub role: String,
    /// Staging (import) table name.
    pub source: String,
    /// Canonical table name.
    pub target: String,
    /// Natural key field present in both tables.
    pub unique_field: String,
    /// Field used as the display name of linked records (default: the key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,
    /// Fill empty fields of records that already exist in the target.
    #[serde(default)]
    pub merge_existing: bool,
    /// Fields copied from source to target, in order.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<AppendRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linkages: Vec<Linkage>,
}

/// Settings for loading CSV exports into a staging table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingConfig {
    /// CSV column whose value identifies a row; later duplicates are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_column: Option<String>,
    /// CSV column name to table field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub columns: BTreeMap<String, String>,
    /// Table field name to a value computed from the row.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub derived: BTreeMap<String, DerivedColumn>,
}

/// A staging field computed from CSV columns instead of copied from one.
///
/// ```toml
/// [staging.derived]
/// School-Type = { value = "Public" }
/// Address = { template = "{Street Address}, {City}, {State} {ZIP}" }
/// School-Level = { grade_levels = { low = "Low Grade*", high = "High Grade*" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedColumn {
    /// Same text for every row.
    Value(String),
    /// Text with `{Column}` placeholders filled from the row.
    Template(String),
    /// School levels (`Pre-K`, `Elementary`, `Middle`, `High`) spanned by two grade columns.
    GradeLevels { low: String, high: String },
}

/// Top-level configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Plan and report without writing (default: true).
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub staging: StagingConfig,
    /// File this configuration was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            batch_size: DEFAULT_BATCH_SIZE,
            store: StoreConfig::default(),
            tables: Vec::new(),
            staging: StagingConfig::default(),
            source_path: None,
        }
    }
}

impl MergeConfig {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults (with env overrides) when no file is found.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("tablemerge").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default_with_env()),
            },
            Err(_) => Ok(Self::default_with_env()),
        }
    }

    /// Defaults with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        let mut config = Self::default();
        config.store = config.store.with_env_overrides();
        config
    }

    /// Load configuration from a specific file path.
    /// The format is chosen by extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        config.store = config.store.with_env_overrides();
        Ok(config)
    }

    /// Parse configuration text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Check internal consistency: batch size bounds, unique roles, known link targets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be between 1 and {} (got {})",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        let mut roles = HashSet::new();
        for table in &self.tables {
            if table.unique_field.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "table '{}' has an empty unique_field",
                    table.role
                )));
            }
            if !roles.insert(table.role.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate table role '{}'",
                    table.role
                )));
            }
        }

        for table in &self.tables {
            for linkage in &table.linkages {
                if !roles.contains(linkage.link_to.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "table '{}' links '{}' to unknown role '{}'",
                        table.role, linkage.target_field, linkage.link_to
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a table by role.
    pub fn table(&self, role: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.role == role)
    }

    /// Tables selected by role, in configured order. `None` selects all.
    pub fn select_tables(&self, roles: Option<&[String]>) -> Result<Vec<&TableConfig>, ConfigError> {
        match roles {
            None => Ok(self.tables.iter().collect()),
            Some(roles) => {
                for role in roles {
                    if self.table(role).is_none() {
                        return Err(ConfigError::Invalid(format!("unknown table role '{}'", role)));
                    }
                }
                Ok(self
                    .tables
                    .iter()
                    .filter(|t| roles.contains(&t.role))
                    .collect())
            }
        }
    }

    /// Serialize to TOML (the token is never written).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        })
    }
}

/// Options controlling where configuration is loaded from.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file (skips discovery).
    pub config_path: Option<PathBuf>,
}

/// Load and validate configuration.
pub async fn load_config(options: &LoadOptions) -> Result<MergeConfig, ConfigError> {
    let config = match options.config_path {
        Some(ref path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            MergeConfig::load_from_path(Path::new(&expanded)).await?
        }
        None => MergeConfig::load().await?,
    };

    if let Some(ref path) = config.source_path {
        tracing::debug!("Loaded configuration from {}", path.display());
    }
    config.validate()?;
    Ok(config)
}
