//! Typed values, records and identities.
//!
//! A [`Record`] is what the engine hands out: field values ordered the way the schema declares
//! them, plus the version the backend stored it under. Records only come out of the validator
//! or out of a repository through [`Record::from_stored`], so every value in one has already
//! been checked against its field type.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

use crate::errors::RepoError;
use crate::schema::{FieldType, Schema};

/// A value of one of the closed set of semantic field types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Enum(String),
    Nested(Record),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text content of string and enum values
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Enum(_) => "enum",
            Self::Nested(_) => "object",
        }
    }

    /// JSON rendering; the validator accepts it back unchanged
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Integer(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Self::String(s) | Self::Enum(s) => JsonValue::String(s.clone()),
            Self::Timestamp(t) => JsonValue::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Nested(record) => record.to_json(),
        }
    }

    /// Whether this value can be stored in a field of `field_type`
    #[must_use]
    pub fn conforms_to(&self, field_type: &FieldType) -> bool {
        match (field_type, self) {
            (_, Self::Null)
            | (FieldType::String, Self::String(_))
            | (FieldType::Integer, Self::Integer(_))
            | (FieldType::Float, Self::Float(_) | Self::Integer(_))
            | (FieldType::Boolean, Self::Bool(_))
            | (FieldType::Timestamp, Self::Timestamp(_)) => true,
            (FieldType::Enum(members), Self::Enum(s)) => members.iter().any(|m| m == s),
            (FieldType::Nested(schema), Self::Nested(record)) => record
                .iter()
                .all(|(name, value)| schema.field(name).is_some_and(|f| value.conforms_to(f.field_type()))),
            _ => false,
        }
    }

    /// Total order used for sorting and keyset pagination.
    ///
    /// `Null` sorts before everything else, integers and floats compare numerically,
    /// strings compare bytewise.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::String(a) | Self::Enum(a), Self::String(b) | Self::Enum(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) | Self::Float(_) => 2,
            Self::Timestamp(_) => 3,
            Self::String(_) | Self::Enum(_) => 4,
            Self::Nested(_) => 5,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Enum(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) | Self::Enum(s) => serializer.serialize_str(s),
            Self::Timestamp(t) => serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::Nested(record) => record.serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Field values of one resource instance, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<(String, Value)>,
    version: Option<i64>,
}

impl Record {
    pub(crate) const fn new() -> Self {
        Self {
            values: Vec::new(),
            version: None,
        }
    }

    /// Build a record from values read back out of storage.
    ///
    /// Values are reordered to schema order and fields the row did not carry are `Null`.
    ///
    /// # Errors
    ///
    /// Returns `RepoError::Backend` when a name is not a schema field or a value does not fit
    /// its field type: the stored data and the schema disagree.
    pub fn from_stored(
        schema: &Schema,
        values: impl IntoIterator<Item = (String, Value)>,
        version: i64,
    ) -> Result<Self, RepoError> {
        let mut stored: Vec<(String, Value)> = values.into_iter().collect();
        let mut record = Self::new();
        for field in schema.fields() {
            let position = stored.iter().position(|(name, _)| name == field.name());
            let value = position.map_or(Value::Null, |idx| stored.swap_remove(idx).1);
            if !value.conforms_to(field.field_type()) {
                return Err(RepoError::Backend(format!(
                    "stored value for `{}.{}` is a {}, expected {}",
                    schema.name(),
                    field.name(),
                    value.type_name(),
                    field.field_type().name()
                )));
            }
            record.values.push((field.name().to_string(), value));
        }
        if let Some((name, _)) = stored.first() {
            return Err(RepoError::Backend(format!(
                "stored column `{name}` is not a field of `{}`",
                schema.name()
            )));
        }
        record.version = Some(version);
        Ok(record)
    }

    /// Append a value; callers push in schema order
    pub(crate) fn push(&mut self, name: impl Into<String>, value: Value) {
        self.values.push((name.into(), value));
    }

    /// Insert or replace a value, keeping schema order
    pub(crate) fn place(&mut self, schema: &Schema, name: &str, value: Value) {
        if let Some(slot) = self.values.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
            return;
        }
        let rank = schema.field_index(name).unwrap_or(usize::MAX);
        let at = self
            .values
            .iter()
            .position(|(n, _)| schema.field_index(n).unwrap_or(usize::MAX) > rank)
            .unwrap_or(self.values.len());
        self.values.insert(at, (name.to_string(), value));
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.values.iter().position(|(n, _)| n == name)?;
        Some(self.values.remove(idx).1)
    }

    /// Apply a partial record on top of this one
    pub(crate) fn merge(&mut self, schema: &Schema, patch: Self) {
        for (name, value) in patch.values {
            self.place(schema, &name, value);
        }
    }

    pub(crate) const fn set_version(&mut self, version: i64) {
        self.version = Some(version);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Version stored by the backend; `None` until the record has been persisted
    #[must_use]
    pub const fn version(&self) -> Option<i64> {
        self.version
    }

    /// Identity of this record, if every identity field is present and non-null
    #[must_use]
    pub fn identity(&self, schema: &Schema) -> Option<Identity> {
        schema
            .identity_key()
            .iter()
            .map(|key| self.get(key).filter(|v| !v.is_null()).cloned())
            .collect::<Option<Vec<_>>>()
            .filter(|values| !values.is_empty())
            .map(Identity)
    }

    /// JSON object of the field values
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Identity key values of one record, one per identity field in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity(Vec<Value>);

impl Identity {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable string form used as a map key by in-process backends
    pub(crate) fn storage_key(&self) -> String {
        JsonValue::Array(self.0.iter().map(Value::to_json).collect()).to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            values => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

impl From<Value> for Identity {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for Identity {
    fn from(value: i64) -> Self {
        Self(vec![Value::Integer(value)])
    }
}

impl From<i32> for Identity {
    fn from(value: i32) -> Self {
        Self(vec![Value::from(value)])
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(vec![Value::from(value)])
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(vec![Value::String(value)])
    }
}

impl From<Vec<Value>> for Identity {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn people() -> Schema {
        Schema::define(
            "person",
            vec![
                Field::integer("id"),
                Field::string("name").required(),
                Field::integer("age"),
            ],
            "id",
        )
        .unwrap()
    }

    #[test]
    fn test_null_sorts_first_and_numbers_compare_across_types() {
        assert_eq!(Value::Null.sort_cmp(&Value::Integer(-5)), Ordering::Less);
        assert_eq!(Value::Integer(2).sort_cmp(&Value::Float(1.5)), Ordering::Greater);
        assert_eq!(Value::Float(2.0).sort_cmp(&Value::Integer(2)), Ordering::Equal);
        assert_eq!(
            Value::Enum("b".to_string()).sort_cmp(&Value::String("a".to_string())),
            Ordering::Greater
        );
    }

    #[test]
    fn test_from_stored_orders_by_schema_and_fills_nulls() {
        let schema = people();
        let record = Record::from_stored(
            &schema,
            vec![
                ("name".to_string(), Value::from("Ann")),
                ("id".to_string(), Value::Integer(4)),
            ],
            3,
        )
        .unwrap();

        let names: Vec<&str> = record.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name", "age"]);
        assert_eq!(record.get("age"), Some(&Value::Null));
        assert_eq!(record.version(), Some(3));
        assert_eq!(record.identity(&schema), Some(Identity::from(4)));
    }

    #[test]
    fn test_from_stored_rejects_mistyped_and_unknown_values() {
        let schema = people();
        let mistyped = Record::from_stored(&schema, vec![("age".to_string(), Value::from("old"))], 1);
        assert!(matches!(mistyped, Err(RepoError::Backend(_))));

        let unknown = Record::from_stored(&schema, vec![("nickname".to_string(), Value::from("A"))], 1);
        assert!(matches!(unknown, Err(RepoError::Backend(_))));
    }

    #[test]
    fn test_place_keeps_schema_order() {
        let schema = people();
        let mut record = Record::new();
        record.push("name", Value::from("Ann"));
        record.place(&schema, "id", Value::Integer(1));
        record.place(&schema, "age", Value::Integer(30));

        let names: Vec<&str> = record.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name", "age"]);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::from(7).to_string(), "7");
        assert_eq!(
            Identity::new(vec![Value::from("eu"), Value::Integer(3)]).to_string(),
            "(eu, 3)"
        );
    }

    #[test]
    fn test_record_serializes_as_object_in_schema_order() {
        let schema = people();
        let record = Record::from_stored(
            &schema,
            vec![("id".to_string(), Value::Integer(1)), ("name".to_string(), Value::from("Ann"))],
            1,
        )
        .unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":1,"name":"Ann","age":null}"#);
    }
}
