use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::errors::QueryError;
use crate::models::SortParam;
use crate::schema::Schema;
use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// Apply this direction to an ascending comparison
    #[must_use]
    pub const fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

/// One sort component of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    #[must_use]
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.direction.as_str())
    }
}

/// Parse the compact `field_desc` / `field_asc` / `field` form
fn parse_compact(schema: &Schema, sort: &str) -> (String, Direction) {
    if schema.field(sort).is_some() {
        return (sort.to_string(), Direction::Asc);
    }
    if let Some(field) = sort.strip_suffix("_desc") {
        return (field.to_string(), Direction::Desc);
    }
    if let Some(field) = sort.strip_suffix("_asc") {
        return (field.to_string(), Direction::Asc);
    }
    (sort.to_string(), Direction::Asc)
}

/// Turn requested sort params into the effective total order.
///
/// Repeated fields keep their first position. Identity fields not named by the request are
/// appended ascending, so an empty request sorts by identity.
pub(crate) fn resolve_sort(schema: &Schema, params: &[SortParam]) -> Result<Vec<SortKey>, QueryError> {
    let mut keys: Vec<SortKey> = Vec::with_capacity(params.len() + schema.identity_key().len());
    for param in params {
        let (field, direction) = match param {
            SortParam::Compact(sort) => parse_compact(schema, sort),
            SortParam::Key { field, direction } => (field.clone(), *direction),
        };
        let definition = schema
            .field(&field)
            .ok_or_else(|| QueryError::UnknownField(field.clone()))?;
        if definition.field_type().is_nested() {
            return Err(QueryError::UnsupportedOperator { field, op: "sort".to_string() });
        }
        if !keys.iter().any(|k| k.field == field) {
            keys.push(SortKey::new(field, direction));
        }
    }
    for identity in schema.identity_key() {
        if !keys.iter().any(|k| &k.field == identity) {
            keys.push(SortKey::new(identity.clone(), Direction::Asc));
        }
    }
    Ok(keys)
}

/// Stable textual form of a sort order, embedded in cursors
pub(crate) fn fingerprint(keys: &[SortKey]) -> String {
    keys.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

/// Compare two records under `keys`. Nulls come first ascending and last descending.
pub(crate) fn compare(keys: &[SortKey], a: &Record, b: &Record) -> Ordering {
    keys.iter()
        .map(|key| {
            let left = a.get(&key.field).unwrap_or(&Value::Null);
            let right = b.get(&key.field).unwrap_or(&Value::Null);
            key.direction.apply(left.sort_cmp(right))
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Whether `record` sorts strictly after the cursor position `after`
pub(crate) fn is_after(keys: &[SortKey], after: &[Value], record: &Record) -> bool {
    keys.iter()
        .zip(after)
        .map(|(key, bound)| {
            let value = record.get(&key.field).unwrap_or(&Value::Null);
            key.direction.apply(value.sort_cmp(bound))
        })
        .find(|ord| ord.is_ne())
        == Some(Ordering::Greater)
}
