//! Cell value mapping between staging and canonical tables.
//!
//! Values read from a staging table carry metadata the target will not
//! accept on write (attachment sizes and thumbnails, select option ids,
//! collaborator emails). Each value is classified by shape and reduced to the
//! part the target needs.

use serde_json::{json, Map, Value};

/// Shape of a cell value, decided by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellShape {
    /// Non-empty list of objects that all carry `url`.
    Attachments,
    /// Non-empty list of objects that all carry `name`.
    MultiSelect,
    /// A single object carrying `name`.
    Named,
    /// Non-empty list of objects that all carry `id`.
    Linked,
    /// Anything else, passed through untouched.
    Scalar,
}

fn all_items_have(items: &[Value], key: &str) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|v| v.as_object().is_some_and(|o| o.contains_key(key)))
}

/// Classify a value. The checks run in declaration order of [`CellShape`],
/// so a list of `{id, name, url}` objects is treated as attachments.
pub fn classify(value: &Value) -> CellShape {
    match value {
        Value::Array(items) if all_items_have(items, "url") => CellShape::Attachments,
        Value::Array(items) if all_items_have(items, "name") => CellShape::MultiSelect,
        Value::Object(obj) if obj.contains_key("name") => CellShape::Named,
        Value::Array(items) if all_items_have(items, "id") => CellShape::Linked,
        _ => CellShape::Scalar,
    }
}

fn project(item: &Value, key: &str) -> Value {
    let mut out = Map::new();
    if let Some(v) = item.get(key) {
        out.insert(key.to_string(), v.clone());
    }
    Value::Object(out)
}

fn project_all(value: &Value, key: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|i| project(i, key)).collect()),
        _ => value.clone(),
    }
}

/// Map a value from a staging table to one suitable for writing to the target.
pub fn map_cell_value(value: &Value) -> Value {
    match classify(value) {
        CellShape::Attachments => project_all(value, "url"),
        CellShape::MultiSelect => project_all(value, "name"),
        CellShape::Named => json!({ "name": value.get("name").cloned().unwrap_or(Value::Null) }),
        CellShape::Linked => project_all(value, "id"),
        CellShape::Scalar => value.clone(),
    }
}

/// Whether a value counts as defined (present and not null).
pub fn is_defined(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachments_keep_only_url() {
        let value = json!([
            {"id": "att1", "url": "https://dl/logo.png", "filename": "logo.png", "size": 10},
            {"url": "https://dl/seal.png", "thumbnails": {}}
        ]);
        assert_eq!(classify(&value), CellShape::Attachments);
        assert_eq!(
            map_cell_value(&value),
            json!([{"url": "https://dl/logo.png"}, {"url": "https://dl/seal.png"}])
        );
    }

    #[test]
    fn test_multi_select_keeps_only_name() {
        let value = json!([{"id": "sel1", "name": "Rural", "color": "blue"}]);
        assert_eq!(classify(&value), CellShape::MultiSelect);
        assert_eq!(map_cell_value(&value), json!([{"name": "Rural"}]));
    }

    #[test]
    fn test_named_object() {
        let value = json!({"id": "usr1", "name": "Dana", "email": "dana@example.org"});
        assert_eq!(classify(&value), CellShape::Named);
        assert_eq!(map_cell_value(&value), json!({"name": "Dana"}));
    }

    #[test]
    fn test_linked_records_keep_only_id() {
        let value = json!([{"id": "rec1", "createdTime": "x"}, {"id": "rec2"}]);
        assert_eq!(classify(&value), CellShape::Linked);
        assert_eq!(map_cell_value(&value), json!([{"id": "rec1"}, {"id": "rec2"}]));
    }

    #[test]
    fn test_mixed_lists_fall_through() {
        // Only some items carry `url`, none carry `name`, so `id` wins.
        let value = json!([{"id": "a", "url": "u"}, {"id": "b"}]);
        assert_eq!(classify(&value), CellShape::Linked);

        let value = json!([{"id": "a"}, {"other": 1}]);
        assert_eq!(classify(&value), CellShape::Scalar);
    }

    #[test]
    fn test_scalars_pass_through() {
        for value in [
            json!("Acme USD"),
            json!(1234),
            json!(null),
            json!([]),
            json!(["a", "b"]),
            json!({"id": "no-name"}),
        ] {
            assert_eq!(classify(&value), CellShape::Scalar);
            assert_eq!(map_cell_value(&value), value);
        }
    }

    #[test]
    fn test_is_defined() {
        assert!(is_defined(Some(&json!(""))));
        assert!(is_defined(Some(&json!(0))));
        assert!(!is_defined(Some(&Value::Null)));
        assert!(!is_defined(None));
    }
}
