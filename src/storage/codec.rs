//! Entity codec.
//!
//! Converts between entity objects (camelCase fields, JSON values) and rows
//! (snake_case columns, SQLite values). Each column accepts only values of
//! its declared kind, so a saved entity reads back unchanged. Structured
//! values are only accepted in columns the registry marks as JSON.

use crate::error::{Error, Result};
use crate::model::Entity;
use crate::storage::registry::{Column, ColumnKind, TableConfig};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// `due_at` -> `dueAt`.
#[must_use]
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for ch in name.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `dueAt` -> `due_at`.
#[must_use]
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            out.push('_');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Encode an entity into SQLite values in the config's column order.
///
/// The `id` column always receives `id`, whatever `value["id"]` holds.
/// Fields without a column are dropped; missing fields become NULL.
///
/// # Errors
///
/// Returns [`Error::InvalidEntityValue`] when a value does not match its
/// column's kind (a float or string for an integer, a number for text, a
/// structured value outside a JSON column), or [`Error::Json`] if
/// serialization fails.
pub fn encode_entity(config: &TableConfig, id: &str, value: &Entity) -> Result<Vec<SqlValue>> {
    config
        .columns
        .iter()
        .map(|column| {
            if column.name == "id" {
                return Ok(SqlValue::Text(id.to_string()));
            }
            match value.get(column.field) {
                None | Some(Value::Null) => Ok(SqlValue::Null),
                Some(field) => encode_value(config, column, field),
            }
        })
        .collect()
}

fn encode_value(config: &TableConfig, column: &Column, value: &Value) -> Result<SqlValue> {
    match (column.kind, value) {
        (ColumnKind::Json, value) => Ok(SqlValue::Text(serde_json::to_string(value)?)),
        (_, Value::Null) => Ok(SqlValue::Null),
        (ColumnKind::Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        (ColumnKind::Integer, Value::Number(n)) => n
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| invalid(config, column, "expected an integer")),
        (ColumnKind::Bool, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(*b))),
        (_, Value::Array(_) | Value::Object(_)) => Err(invalid(
            config,
            column,
            "structured values are only allowed in JSON columns",
        )),
        (ColumnKind::Text, _) => Err(invalid(config, column, "expected a string")),
        (ColumnKind::Integer, _) => Err(invalid(config, column, "expected an integer")),
        (ColumnKind::Bool, _) => Err(invalid(config, column, "expected a boolean")),
    }
}

fn invalid(config: &TableConfig, column: &Column, reason: &str) -> Error {
    Error::InvalidEntityValue {
        entity_type: config.entity_type.to_string(),
        field: column.field.to_string(),
        reason: reason.to_string(),
    }
}

/// Decode one row, read as raw values in the config's column order.
///
/// NULL columns are omitted from the result.
///
/// # Errors
///
/// Returns [`Error::InvalidStoredJson`] if a JSON column does not parse.
pub fn decode_row(config: &TableConfig, values: Vec<SqlValue>) -> Result<Entity> {
    let entity_id = match values.first() {
        Some(SqlValue::Text(id)) => id.clone(),
        Some(SqlValue::Integer(id)) => id.to_string(),
        _ => String::new(),
    };

    let mut entity = Entity::new();
    for (column, raw) in config.columns.iter().zip(values) {
        let decoded = match raw {
            SqlValue::Null => continue,
            SqlValue::Text(text) if column.is_json() => serde_json::from_str(&text)
                .map_err(|source| Error::InvalidStoredJson {
                    entity_type: config.entity_type.to_string(),
                    entity_id: entity_id.clone(),
                    column: column.name.to_string(),
                    source,
                })?,
            SqlValue::Text(text) => Value::String(text),
            SqlValue::Integer(i) if column.kind == ColumnKind::Bool => Value::Bool(i != 0),
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
            SqlValue::Blob(_) => {
                return Err(invalid(config, column, "blob values are not supported"));
            }
        };
        entity.insert(column.field.to_string(), decoded);
    }

    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::registry::table_config;
    use serde_json::json;

    fn object(value: Value) -> Entity {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_case_conversion() {
        assert_eq!(snake_to_camel("due_at"), "dueAt");
        assert_eq!(snake_to_camel("id"), "id");
        assert_eq!(camel_to_snake("durationMs"), "duration_ms");
        assert_eq!(camel_to_snake(&snake_to_camel("received_at")), "received_at");
    }

    #[test]
    fn test_encode_orders_columns_and_overrides_id() {
        let config = table_config("task").unwrap();
        let value = object(json!({
            "id": "ignored",
            "title": "Write report",
            "status": "open",
            "tags": ["work", "q3"],
            "unknownField": 1
        }));

        let encoded = encode_entity(config, "t1", &value).unwrap();
        assert_eq!(encoded.len(), config.columns.len());
        assert_eq!(encoded[0], SqlValue::Text("t1".into()));
        assert_eq!(encoded[1], SqlValue::Text("Write report".into()));
        assert_eq!(encoded[3], SqlValue::Null);
        assert_eq!(encoded[5], SqlValue::Text(r#"["work","q3"]"#.into()));
    }

    #[test]
    fn test_structured_value_in_scalar_column_rejected() {
        let config = table_config("note").unwrap();
        let value = object(json!({ "body": { "nested": true } }));

        let err = encode_entity(config, "n1", &value).unwrap_err();
        assert!(matches!(err, Error::InvalidEntityValue { ref field, .. } if field == "body"));
    }

    #[test]
    fn test_mismatched_scalars_rejected() {
        let task = table_config("task").unwrap();
        let job = table_config("job").unwrap();

        let cases = [
            (task, json!({ "title": 42 }), "title"),
            (task, json!({ "priority": 2.0 }), "priority"),
            (task, json!({ "priority": "high" }), "priority"),
            (job, json!({ "enabled": 1 }), "enabled"),
            (job, json!({ "name": true }), "name"),
        ];
        for (config, value, expected) in cases {
            let err = encode_entity(config, "x", &object(value)).unwrap_err();
            assert!(
                matches!(err, Error::InvalidEntityValue { ref field, .. } if field == expected),
                "{expected}: {err}"
            );
        }
    }

    #[test]
    fn test_every_kind_round_trips() {
        let job = table_config("job").unwrap();
        let task = table_config("task").unwrap();
        let cases = [
            (
                job,
                json!({
                    "id": "j1",
                    "name": "Backup",
                    "enabled": false,
                    "config": { "retries": 3, "ratio": 0.5 }
                }),
            ),
            (
                task,
                json!({
                    "id": "t1",
                    "title": "42",
                    "status": "open",
                    "priority": -7,
                    "tags": [],
                    "metadata": null
                }),
            ),
        ];

        for (config, value) in cases {
            let mut entity = object(value);
            let encoded = encode_entity(config, entity["id"].as_str().unwrap(), &entity).unwrap();
            entity.retain(|_, v| !v.is_null());
            assert_eq!(decode_row(config, encoded).unwrap(), entity);
        }
    }

    #[test]
    fn test_decode_skips_nulls_and_parses_json() {
        let config = table_config("signal").unwrap();
        let row = vec![
            SqlValue::Text("s1".into()),
            SqlValue::Text("calendar".into()),
            SqlValue::Text("reminder".into()),
            SqlValue::Text(r#"{"minutes":15}"#.into()),
            SqlValue::Null,
        ];

        let entity = decode_row(config, row).unwrap();
        assert_eq!(
            Value::Object(entity),
            json!({
                "id": "s1",
                "source": "calendar",
                "kind": "reminder",
                "payload": { "minutes": 15 }
            })
        );
    }

    #[test]
    fn test_corrupt_json_fails_with_context() {
        let config = table_config("checkpoint").unwrap();
        let row = vec![
            SqlValue::Text("c1".into()),
            SqlValue::Text("before".into()),
            SqlValue::Text("{not json".into()),
            SqlValue::Null,
        ];

        let err = decode_row(config, row).unwrap_err();
        match err {
            Error::InvalidStoredJson {
                entity_type,
                entity_id,
                column,
                ..
            } => {
                assert_eq!(entity_type, "checkpoint");
                assert_eq!(entity_id, "c1");
                assert_eq!(column, "snapshot");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
