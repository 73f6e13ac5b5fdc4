//! Airtable REST API client.
//!
//! Records are listed page by page through `GET /v0/{base}/{table}`, the
//! schema comes from the metadata API and is cached for the lifetime of the
//! client, and writes are split into requests of at most
//! [`MAX_RECORDS_PER_REQUEST`] records.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{FieldInfo, Fields, NewRecord, Record, RecordUpdate, StoreError, TableStore};
use crate::config::StoreConfig;

/// Maximum number of records accepted by a single create or update request.
pub const MAX_RECORDS_PER_REQUEST: usize = 10;

const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct ListResponse {
    records: Vec<Record>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    records: Vec<CreatedRecord>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    records: Vec<OutgoingFields<'a>>,
    typecast: bool,
}

#[derive(Debug, Serialize)]
struct OutgoingFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    fields: Fields,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    records: Vec<OutgoingFields<'a>>,
    typecast: bool,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    tables: Vec<MetaTable>,
}

#[derive(Debug, Deserialize)]
struct MetaTable {
    id: String,
    name: String,
    fields: Vec<FieldInfo>,
}

/// Convert a cell value from the scripting shape used by the mapper into the
/// shape accepted by the REST API.
///
/// Linked records and multi-selects travel as plain string arrays, and a
/// single select as a plain string. Attachments (`{url}`) are accepted as-is.
pub(crate) fn rest_cell_value(value: &Value) -> Value {
    fn only_key<'v>(item: &'v Value, key: &str) -> Option<&'v Value> {
        let obj = item.as_object()?;
        if obj.len() == 1 {
            obj.get(key)
        } else {
            None
        }
    }

    match value {
        Value::Array(items) if !items.is_empty() => {
            for key in ["id", "name"] {
                let flattened: Option<Vec<Value>> =
                    items.iter().map(|i| only_key(i, key).cloned()).collect();
                if let Some(flattened) = flattened {
                    return Value::Array(flattened);
                }
            }
            value.clone()
        }
        Value::Object(_) => only_key(value, "name")
            .cloned()
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

fn rest_fields(fields: &Fields) -> Fields {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), rest_cell_value(v)))
        .collect()
}

/// Pull a human-readable message out of an Airtable error body.
///
/// Errors come back either as `{"error": {"type": ..., "message": ...}}` or
/// as `{"error": "NOT_FOUND"}`.
pub(crate) fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    match error {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => {
            let kind = obj.get("type").and_then(Value::as_str).unwrap_or("ERROR");
            match obj.get("message").and_then(Value::as_str) {
                Some(message) => format!("{}: {}", kind, message),
                None => kind.to_string(),
            }
        }
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}

/// Table store backed by the Airtable REST API.
pub struct AirtableStore {
    client: Client,
    endpoint: String,
    base_id: String,
    token: String,
    request_delay: Duration,
    typecast: bool,
    schema: Mutex<Option<HashMap<String, Vec<FieldInfo>>>>,
}

impl AirtableStore {
    /// Create a client from store configuration.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base_id = config
            .base_id
            .clone()
            .ok_or_else(|| StoreError::NotConfigured("base id (AIRTABLE_BASE_ID)".into()))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| StoreError::NotConfigured("API token (AIRTABLE_TOKEN)".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("tablemerge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            base_id,
            token,
            request_delay: Duration::from_millis(config.request_delay_ms),
            typecast: config.typecast,
            schema: Mutex::new(None),
        })
    }

    /// Human-readable description of the connected base.
    pub fn describe(&self) -> String {
        format!("{} (base {})", self.endpoint, self.base_id)
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/v0/{}/{}",
            self.endpoint,
            self.base_id,
            urlencoding::encode(table)
        )
    }

    fn meta_url(&self) -> String {
        format!("{}/v0/meta/bases/{}/tables", self.endpoint, self.base_id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    /// Send a request after the pacing delay, mapping non-success statuses to errors.
    async fn send(&self, table: &str, request: RequestBuilder) -> Result<Response, StoreError> {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Api {
            table: table.to_string(),
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn table_fields(&self, table: &str) -> Result<Vec<FieldInfo>, StoreError> {
        let mut schema = self.schema.lock().await;
        if schema.is_none() {
            let resp = self
                .send(table, self.request(Method::GET, &self.meta_url()))
                .await?;
            let meta: MetaResponse = resp
                .json()
                .await
                .map_err(|e| StoreError::Parse(e.to_string()))?;

            let mut tables = HashMap::new();
            for t in meta.tables {
                tables.insert(t.id, t.fields.clone());
                tables.insert(t.name, t.fields);
            }
            debug!("Cached schema for {} tables", tables.len() / 2);
            *schema = Some(tables);
        }

        schema
            .as_ref()
            .and_then(|tables| tables.get(table).cloned())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }
}

#[async_trait]
impl TableStore for AirtableStore {
    async fn select_records(
        &self,
        table: &str,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, StoreError> {
        let url = self.table_url(table);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("pageSize", PAGE_SIZE)];
            if let Some(names) = fields {
                query.extend(names.iter().map(|n| ("fields[]", n.as_str())));
            }
            if let Some(ref o) = offset {
                query.push(("offset", o.as_str()));
            }

            let resp = self
                .send(table, self.request(Method::GET, &url).query(&query))
                .await?;
            let page: ListResponse = resp
                .json()
                .await
                .map_err(|e| StoreError::Parse(e.to_string()))?;

            records.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        info!("Fetched {} records from {}", records.len(), table);
        Ok(records)
    }

    async fn get_field(&self, table: &str, field: &str) -> Result<Option<FieldInfo>, StoreError> {
        let fields = self.table_fields(table).await?;
        Ok(fields.into_iter().find(|f| f.name == field))
    }

    async fn create_records(
        &self,
        table: &str,
        records: &[NewRecord],
    ) -> Result<Vec<String>, StoreError> {
        let url = self.table_url(table);
        let mut ids = Vec::with_capacity(records.len());

        for chunk in records.chunks(MAX_RECORDS_PER_REQUEST) {
            let body = CreateRequest {
                records: chunk
                    .iter()
                    .map(|r| OutgoingFields {
                        id: None,
                        fields: rest_fields(&r.fields),
                    })
                    .collect(),
                typecast: self.typecast,
            };
            let resp = self
                .send(table, self.request(Method::POST, &url).json(&body))
                .await?;
            let created: WriteResponse = resp
                .json()
                .await
                .map_err(|e| StoreError::Parse(e.to_string()))?;
            ids.extend(created.records.into_iter().map(|r| r.id));
        }

        Ok(ids)
    }

    async fn update_records(
        &self,
        table: &str,
        updates: &[RecordUpdate],
    ) -> Result<(), StoreError> {
        let url = self.table_url(table);

        for chunk in updates.chunks(MAX_RECORDS_PER_REQUEST) {
            let body = UpdateRequest {
                records: chunk
                    .iter()
                    .map(|u| OutgoingFields {
                        id: Some(u.id.as_str()),
                        fields: rest_fields(&u.fields),
                    })
                    .collect(),
                typecast: self.typecast,
            };
            self.send(table, self.request(Method::PATCH, &url).json(&body))
                .await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for AirtableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableStore")
            .field("endpoint", &self.endpoint)
            .field("base_id", &self.base_id)
            .field("typecast", &self.typecast)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> AirtableStore {
        let config = StoreConfig {
            base_id: Some("appBASE".into()),
            token: Some("pat123".into()),
            endpoint: "https://api.airtable.com/".into(),
            request_delay_ms: 0,
            ..StoreConfig::default()
        };
        AirtableStore::new(&config).unwrap()
    }

    #[test]
    fn test_table_url_encodes_name() {
        let store = store();
        assert_eq!(
            store.table_url("NCES District Import"),
            "https://api.airtable.com/v0/appBASE/NCES%20District%20Import"
        );
        assert_eq!(
            store.meta_url(),
            "https://api.airtable.com/v0/meta/bases/appBASE/tables"
        );
    }

    #[test]
    fn test_missing_credentials() {
        let err = AirtableStore::new(&StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotConfigured(_)));
    }

    #[test]
    fn test_rest_cell_values() {
        assert_eq!(
            rest_cell_value(&json!([{"id": "rec1"}, {"id": "rec2"}])),
            json!(["rec1", "rec2"])
        );
        assert_eq!(
            rest_cell_value(&json!([{"name": "K-12"}])),
            json!(["K-12"])
        );
        assert_eq!(rest_cell_value(&json!({"name": "City"})), json!("City"));
        assert_eq!(
            rest_cell_value(&json!([{"url": "https://x/logo.png"}])),
            json!([{"url": "https://x/logo.png"}])
        );
        assert_eq!(rest_cell_value(&json!("plain")), json!("plain"));
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(r#"{"error": {"type": "INVALID_REQUEST_UNKNOWN", "message": "Bad"}}"#),
            "INVALID_REQUEST_UNKNOWN: Bad"
        );
        assert_eq!(error_message(r#"{"error": "NOT_FOUND"}"#), "NOT_FOUND");
        assert_eq!(error_message(""), "empty response body");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_list_response_parsing() {
        let body = json!({
            "records": [
                {"id": "rec1", "createdTime": "2025-11-01T00:00:00.000Z", "fields": {"NCES-District-ID": "001"}},
                {"id": "rec2", "createdTime": "2025-11-01T00:00:00.000Z", "fields": {}}
            ],
            "offset": "itr123/rec2"
        });
        let page: ListResponse = serde_json::from_value(body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.offset.as_deref(), Some("itr123/rec2"));
        assert_eq!(page.records[0].key("NCES-District-ID").as_deref(), Some("001"));
    }
}
