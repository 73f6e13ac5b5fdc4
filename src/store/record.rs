//! Record types exchanged with a table store.
//!
//! Cell values are kept as raw JSON so that every shape the platform returns
//! (scalars, named objects, linked records, attachments) survives a read and
//! can be inspected by the value mapper before it is written back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name to cell value map of a single record.
pub type Fields = Map<String, Value>;

/// A record as read from a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Get a cell value. JSON null is treated the same as an absent cell.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Natural key stored in `field`, if present and non-empty.
    pub fn key(&self, field: &str) -> Option<String> {
        self.get(field).and_then(key_text)
    }
}

/// A record to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub fields: Fields,
}

impl NewRecord {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }
}

/// A partial update of an existing record, addressed by record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: Fields,
}

impl RecordUpdate {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Schema entry for a single field of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

impl FieldInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: None,
        }
    }
}

/// Render a cell value as plain text.
///
/// Lists are joined with `", "`; objects render as their `name`, falling back
/// to `id` and `url`.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(obj) => ["name", "id", "url"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
    }
}

/// Key text of a value: its text rendering, or `None` when that is empty.
///
/// Keys are compared as text on purpose: a number cell `601` and a text cell
/// `"601"` name the same record, since the same identifier column can be
/// typed differently in the staging and canonical tables. A lookup or link
/// cell keys by its joined display names.
pub fn key_text(value: &Value) -> Option<String> {
    let text = value_text(value);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_cells_read_as_absent() {
        let mut fields = Fields::new();
        fields.insert("A".into(), Value::Null);
        fields.insert("B".into(), json!("x"));
        let record = Record::new("rec1", fields);

        assert!(record.get("A").is_none());
        assert!(record.get("missing").is_none());
        assert_eq!(record.get("B"), Some(&json!("x")));
    }

    #[test]
    fn test_key_text() {
        assert_eq!(key_text(&json!("001")), Some("001".to_string()));
        assert_eq!(key_text(&json!(42)), Some("42".to_string()));
        assert_eq!(key_text(&json!("")), None);
        assert_eq!(key_text(&json!([])), None);
        assert_eq!(key_text(&json!({"id": "rec1", "name": "Acme"})), Some("Acme".to_string()));
    }

    #[test]
    fn test_numeric_and_text_keys_match() {
        assert_eq!(key_text(&json!(601)), key_text(&json!("601")));
        assert_eq!(
            key_text(&json!([{"id": "rec1", "name": "A"}, {"id": "rec2", "name": "B"}])),
            Some("A, B".to_string())
        );
    }

    #[test]
    fn test_value_text_joins_lists() {
        assert_eq!(
            value_text(&json!([{"name": "K-12"}, {"name": "Rural"}])),
            "K-12, Rural"
        );
        assert_eq!(value_text(&json!(["a", "", "b"])), "a, b");
    }

    #[test]
    fn test_update_serializes_with_id() {
        let mut fields = Fields::new();
        fields.insert("District-Name".into(), json!("Acme"));
        let update = RecordUpdate::new("rec9", fields);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, json!({"id": "rec9", "fields": {"District-Name": "Acme"}}));
    }
}
