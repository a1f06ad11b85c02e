//! Opaque keyset cursors.
//!
//! A cursor is base64url (no padding) of `{"s": "<sort fingerprint>", "k": [<sort key values>]}`.
//! Decoding checks the fingerprint against the current request's effective sort and coerces the
//! key values back to the sort fields' types, so a cursor cannot be replayed against another order.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::sort::{SortKey, fingerprint};
use crate::errors::QueryError;
use crate::schema::Schema;
use crate::validation::coerce_type;
use crate::value::{Record, Value};

#[derive(Debug, Serialize, Deserialize)]
struct CursorToken {
    s: String,
    k: Vec<JsonValue>,
}

/// Cursor pointing just past `record` under `keys`
pub(crate) fn encode_cursor(keys: &[SortKey], record: &Record) -> String {
    let token = CursorToken {
        s: fingerprint(keys),
        k: keys
            .iter()
            .map(|key| record.get(&key.field).map_or(JsonValue::Null, Value::to_json))
            .collect(),
    };
    // a struct of a string and JSON values always serializes
    let json = serde_json::to_vec(&token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a cursor issued for `keys`, returning the typed key values
pub(crate) fn decode_cursor(schema: &Schema, keys: &[SortKey], cursor: &str) -> Result<Vec<Value>, QueryError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim())
        .map_err(|_| QueryError::InvalidCursor("not a cursor issued by this service".to_string()))?;
    let token: CursorToken = serde_json::from_slice(&bytes)
        .map_err(|_| QueryError::InvalidCursor("not a cursor issued by this service".to_string()))?;

    let expected = fingerprint(keys);
    if token.s != expected {
        return Err(QueryError::InvalidCursor(format!(
            "cursor was issued for sort `{}`, request sorts by `{expected}`",
            token.s
        )));
    }
    if token.k.len() != keys.len() {
        return Err(QueryError::InvalidCursor("cursor key does not match the sort".to_string()));
    }

    keys.iter()
        .zip(&token.k)
        .map(|(key, raw)| {
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let field = schema
                .field(&key.field)
                .ok_or_else(|| QueryError::InvalidCursor(format!("unknown sort field `{}`", key.field)))?;
            coerce_type(field.field_type(), raw, &key.field)
                .map_err(|e| QueryError::InvalidCursor(format!("bad value for `{}`: {}", key.field, e.message)))
        })
        .collect()
}

/// One page of a list result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    pub records: Vec<Record>,
    /// Present while more records follow; `None` on the last page
    pub next_cursor: Option<String>,
}

impl ListPage {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            records: Vec::new(),
            next_cursor: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::sort::Direction;
    use crate::schema::Field;
    use chrono::{TimeZone, Utc};

    fn schema() -> Schema {
        Schema::define(
            "person",
            vec![Field::integer("id"), Field::float("score"), Field::timestamp("joined_at")],
            "id",
        )
        .unwrap()
    }

    fn keys() -> Vec<SortKey> {
        vec![
            SortKey::new("joined_at", Direction::Desc),
            SortKey::new("score", Direction::Asc),
            SortKey::new("id", Direction::Asc),
        ]
    }

    #[test]
    fn test_cursor_keeps_typed_values() {
        let schema = schema();
        let joined = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let record = Record::from_stored(
            &schema,
            vec![
                ("id".to_string(), Value::Integer(9)),
                ("score".to_string(), Value::Float(2.0)),
                ("joined_at".to_string(), Value::Timestamp(joined)),
            ],
            1,
        )
        .unwrap();

        let cursor = encode_cursor(&keys(), &record);
        assert!(!cursor.contains('='));
        let values = decode_cursor(&schema, &keys(), &cursor).unwrap();
        assert_eq!(values, vec![Value::Timestamp(joined), Value::Float(2.0), Value::Integer(9)]);
    }

    #[test]
    fn test_cursor_for_another_sort_is_rejected() {
        let schema = schema();
        let record = Record::from_stored(&schema, vec![("id".to_string(), Value::Integer(1))], 1).unwrap();
        let cursor = encode_cursor(&keys(), &record);

        let other = vec![SortKey::new("id", Direction::Asc)];
        assert!(matches!(
            decode_cursor(&schema, &other, &cursor),
            Err(QueryError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_garbage_cursor_is_rejected() {
        let schema = schema();
        let keys = vec![SortKey::new("id", Direction::Asc)];
        let mistyped = URL_SAFE_NO_PAD.encode(r#"{"s":"id:asc","k":["x"]}"#);
        for cursor in ["", "!!!", "bm90IGpzb24", mistyped.as_str()] {
            assert!(
                matches!(decode_cursor(&schema, &keys, cursor), Err(QueryError::InvalidCursor(_))),
                "accepted {cursor:?}"
            );
        }
    }
}
