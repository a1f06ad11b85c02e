use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::filtering::conditions::FilterOp;
use crate::filtering::sort::Direction;

/// List request parameters as a transport adapter deserializes them.
///
/// # Filtering
/// Filters can be given in two shapes, combined with AND:
/// - **Explicit:** `filters: [{"field": "age", "op": "gte", "value": 30}]`. `op` defaults to `eq`.
/// - **Keyed:** `filter: {"age_gte": 30, "role_in": ["admin"], "name_like": "an"}`. A key that
///   is a field name means `eq`; otherwise the suffix (`_ne`, `_neq`, `_lt`, `_lte`, `_gt`,
///   `_gte`, `_in`, `_like`, `_contains`) names the operator.
///
/// # Sorting
/// `sort` is a list of `{"field": "age", "direction": "desc"}` objects or compact strings
/// `"age_desc"` / `"age_asc"` / `"age"`. Identity fields are always appended as a tie-breaker.
///
/// # Pagination
/// - **Offset:** `limit` and `offset`.
/// - **Keyset:** `limit` and the `cursor` returned as `next_cursor` by the previous page.
///
/// `limit` is clamped to the engine's configured maximum.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListParams {
    #[serde(default)]
    pub filters: Vec<FilterParam>,
    #[serde(default)]
    pub filter: Option<Map<String, JsonValue>>,
    #[serde(default)]
    pub sort: Vec<SortParam>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
}

impl ListParams {
    #[must_use]
    pub fn page(&self) -> PageParams {
        PageParams {
            limit: self.limit,
            offset: self.offset,
            cursor: self.cursor.clone(),
        }
    }

    /// Add an explicit filter
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<JsonValue>) -> Self {
        self.filters.push(FilterParam {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.sort.push(SortParam::Key {
            field: field.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// One `field op value` condition
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterParam {
    pub field: String,
    #[serde(default)]
    pub op: FilterOp,
    pub value: JsonValue,
}

/// A sort key, either `"age_desc"` or `{"field": "age", "direction": "desc"}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SortParam {
    Compact(String),
    Key {
        field: String,
        #[serde(default)]
        direction: Direction,
    },
}

/// Pagination part of a list request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
}
