use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

use crate::errors::QueryError;
use crate::schema::{FieldType, Schema};
use crate::validation::coerce_type;
use crate::value::{Record, Value};

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[default]
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    /// Substring match, ASCII case-insensitive
    Contains,
}

impl FilterOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::In => "in",
            Self::Contains => "contains",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const EQUALITY_OPS: &[FilterOp] = &[FilterOp::Eq, FilterOp::Ne, FilterOp::In];
const ORDERED_OPS: &[FilterOp] = &[
    FilterOp::Eq,
    FilterOp::Ne,
    FilterOp::In,
    FilterOp::Lt,
    FilterOp::Lte,
    FilterOp::Gt,
    FilterOp::Gte,
];
const STRING_OPS: &[FilterOp] = &[FilterOp::Eq, FilterOp::Ne, FilterOp::In, FilterOp::Contains];

/// Operators allowed on a field of `field_type`
#[must_use]
pub const fn operators_for(field_type: &FieldType) -> &'static [FilterOp] {
    match field_type {
        FieldType::Integer | FieldType::Float | FieldType::Timestamp => ORDERED_OPS,
        FieldType::String => STRING_OPS,
        FieldType::Boolean | FieldType::Enum(_) => EQUALITY_OPS,
        FieldType::Nested(_) => &[],
    }
}

/// Keyed filter suffixes, e.g. `age_gte`
const SUFFIXES: &[(&str, FilterOp)] = &[
    ("_neq", FilterOp::Ne),
    ("_ne", FilterOp::Ne),
    ("_lte", FilterOp::Lte),
    ("_lt", FilterOp::Lt),
    ("_gte", FilterOp::Gte),
    ("_gt", FilterOp::Gt),
    ("_in", FilterOp::In),
    ("_like", FilterOp::Contains),
    ("_contains", FilterOp::Contains),
];

/// Split a keyed filter into field and operator.
///
/// A key naming a field exactly is an equality filter, so fields whose names end in an operator
/// suffix stay reachable.
pub(crate) fn split_keyed_filter<'a>(schema: &Schema, key: &'a str) -> Result<(&'a str, FilterOp), QueryError> {
    if schema.field(key).is_some() {
        return Ok((key, FilterOp::Eq));
    }
    SUFFIXES
        .iter()
        .find_map(|(suffix, op)| {
            key.strip_suffix(suffix)
                .filter(|base| schema.field(base).is_some())
                .map(|base| (base, *op))
        })
        .ok_or_else(|| QueryError::UnknownField(key.to_string()))
}

/// Right-hand side of a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Single(Value),
    /// Non-empty, never contains `Null`
    List(Vec<Value>),
}

/// One checked `field op value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    op: FilterOp,
    value: FilterValue,
}

impl Filter {
    /// Check `field` and `op` against the schema and coerce `raw` to the field type.
    ///
    /// # Errors
    ///
    /// - `UnknownField` when `field` is not part of the schema
    /// - `UnsupportedOperator` when `op` does not apply to the field type
    /// - `InvalidValue` when `raw` does not coerce, or is `null` for anything but `eq`/`ne`
    pub fn resolve(schema: &Schema, field: &str, op: FilterOp, raw: &JsonValue) -> Result<Self, QueryError> {
        let definition = schema
            .field(field)
            .ok_or_else(|| QueryError::UnknownField(field.to_string()))?;
        if !operators_for(definition.field_type()).contains(&op) {
            return Err(QueryError::UnsupportedOperator {
                field: field.to_string(),
                op: op.to_string(),
            });
        }

        let invalid = |reason: String| QueryError::InvalidValue {
            field: field.to_string(),
            reason,
        };
        let coerce = |raw: &JsonValue| {
            coerce_type(definition.field_type(), raw, field).map_err(|e| invalid(e.message))
        };

        let value = match (op, raw) {
            (FilterOp::In, JsonValue::Array(items)) if items.is_empty() => {
                return Err(invalid("expected a non-empty array".to_string()));
            }
            (FilterOp::In, JsonValue::Array(items)) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if item.is_null() {
                        return Err(invalid("null is not allowed in an `in` list".to_string()));
                    }
                    values.push(coerce(item)?);
                }
                FilterValue::List(values)
            }
            (FilterOp::In, _) => return Err(invalid("expected an array".to_string())),
            (FilterOp::Eq | FilterOp::Ne, JsonValue::Null) => FilterValue::Single(Value::Null),
            (_, JsonValue::Null) => return Err(invalid(format!("`{op}` needs a non-null value"))),
            (FilterOp::Contains, JsonValue::String(s)) => FilterValue::Single(Value::String(s.clone())),
            (_, raw) => FilterValue::Single(coerce(raw)?),
        };

        Ok(Self {
            field: field.to_string(),
            op,
            value,
        })
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub const fn op(&self) -> FilterOp {
        self.op
    }

    #[must_use]
    pub const fn value(&self) -> &FilterValue {
        &self.value
    }

    /// Whether `record` satisfies the filter, with SQL's treatment of `NULL`: only `eq null` and
    /// `ne null` can match a null field value.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match (&self.value, self.op) {
            (FilterValue::Single(Value::Null), FilterOp::Eq) => actual.is_null(),
            (FilterValue::Single(Value::Null), FilterOp::Ne) => !actual.is_null(),
            _ if actual.is_null() => false,
            (FilterValue::List(values), _) => values.iter().any(|v| actual.sort_cmp(v) == Ordering::Equal),
            (FilterValue::Single(expected), FilterOp::Contains) => match (actual.as_str(), expected.as_str()) {
                (Some(haystack), Some(needle)) => haystack.to_ascii_uppercase().contains(&needle.to_ascii_uppercase()),
                _ => false,
            },
            (FilterValue::Single(expected), op) => {
                let ord = actual.sort_cmp(expected);
                match op {
                    FilterOp::Eq | FilterOp::In => ord == Ordering::Equal,
                    FilterOp::Ne => ord != Ordering::Equal,
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Lte => ord != Ordering::Greater,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Gte => ord != Ordering::Less,
                    FilterOp::Contains => false,
                }
            }
        }
    }
}
