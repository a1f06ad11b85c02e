//! # Filtering, Sorting & Pagination
//!
//! This module turns list parameters into a checked [`QuerySpec`]. Every field and operator is
//! validated against the schema before a repository sees the query, so backends only translate.
//!
//! ## Filters
//!
//! | Field type                     | Operators                               |
//! |--------------------------------|-----------------------------------------|
//! | integer, float, timestamp      | `eq ne in lt lte gt gte`                |
//! | string                         | `eq ne in contains` (ASCII case-folded) |
//! | boolean, enum                  | `eq ne in`                              |
//! | nested object                  | none                                    |
//!
//! `eq null` / `ne null` test for null. Every other comparison is false on a null field value.
//!
//! ## Sorting
//!
//! The identity key is appended to every sort (ascending) so the order is total. Nulls sort
//! first ascending and last descending.
//!
//! ## Pagination
//!
//! Offset pagination (`limit` + `offset`) and keyset pagination (`limit` + `cursor`) are both
//! supported but not combined. A page carries `next_cursor` while more records follow:
//!
//! ```rust,ignore
//! let mut params = ListParams::default().sort_by("age", Direction::Desc).limit(20);
//! loop {
//!     let page = engine.list(&params).await?;
//!     handle(page.records);
//!     match page.next_cursor {
//!         Some(cursor) => params = params.cursor(cursor),
//!         None => break,
//!     }
//! }
//! ```

pub mod conditions;
pub mod pagination;
pub mod sort;

pub use conditions::{Filter, FilterOp, FilterValue, operators_for};
pub use pagination::ListPage;
pub use sort::{Direction, SortKey};

use std::cmp::Ordering;

use crate::config::EngineConfig;
use crate::errors::QueryError;
use crate::models::{FilterParam, ListParams, PageParams, SortParam};
use crate::schema::Schema;
use crate::value::{Record, Value};

/// A checked list query, ready for a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    filters: Vec<Filter>,
    sort: Vec<SortKey>,
    limit: u64,
    offset: u64,
    after: Option<Vec<Value>>,
}

impl QuerySpec {
    /// Filters, combined with AND
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Effective sort, always ending in the identity fields
    #[must_use]
    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Rows a backend should fetch: one more than `limit`, to learn whether another page follows
    #[must_use]
    pub const fn fetch_limit(&self) -> u64 {
        self.limit.saturating_add(1)
    }

    /// Sort key values of the last record of the previous page
    #[must_use]
    pub fn after(&self) -> Option<&[Value]> {
        self.after.as_deref()
    }

    /// Whether `record` passes every filter
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Order of two records under the effective sort
    #[must_use]
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        sort::compare(&self.sort, a, b)
    }

    /// Whether `record` lies past the cursor; always true without one
    #[must_use]
    pub fn is_after_cursor(&self, record: &Record) -> bool {
        self.after
            .as_deref()
            .is_none_or(|after| sort::is_after(&self.sort, after, record))
    }

    /// Trim a fetch of up to [`fetch_limit`](Self::fetch_limit) sorted rows to one page and
    /// issue the cursor for the next one.
    #[must_use]
    pub fn paginate(&self, mut records: Vec<Record>) -> ListPage {
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        if records.len() <= limit {
            return ListPage {
                records,
                next_cursor: None,
            };
        }
        records.truncate(limit);
        let next_cursor = records.last().map(|last| pagination::encode_cursor(&self.sort, last));
        ListPage { records, next_cursor }
    }

    /// Evaluate the whole query over records held in memory
    #[must_use]
    pub fn apply<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> ListPage {
        let mut selected: Vec<&Record> = records
            .into_iter()
            .filter(|r| self.matches(r) && self.is_after_cursor(r))
            .collect();
        selected.sort_by(|a, b| self.compare(a, b));

        let skip = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let take = usize::try_from(self.fetch_limit()).unwrap_or(usize::MAX);
        self.paginate(selected.into_iter().skip(skip).take(take).cloned().collect())
    }
}

/// Build a [`QuerySpec`] from explicit filters, sort keys and pagination.
///
/// # Errors
///
/// - `UnknownField` / `UnsupportedOperator` / `InvalidValue` for bad filters or sort keys
/// - `InvalidCursor` for a cursor not issued for this sort order
/// - `InvalidPagination` when a cursor is combined with a non-zero offset
pub fn build_query_spec(
    schema: &Schema,
    filters: &[FilterParam],
    sort: &[SortParam],
    page: &PageParams,
    config: &EngineConfig,
) -> Result<QuerySpec, QueryError> {
    let filters = filters
        .iter()
        .map(|f| Filter::resolve(schema, &f.field, f.op, &f.value))
        .collect::<Result<Vec<_>, _>>()?;
    let sort = sort::resolve_sort(schema, sort)?;

    let offset = page.offset.unwrap_or(0);
    let after = match page.cursor.as_deref() {
        Some(_) if offset > 0 => {
            return Err(QueryError::InvalidPagination(
                "a cursor cannot be combined with an offset".to_string(),
            ));
        }
        Some(cursor) => Some(pagination::decode_cursor(schema, &sort, cursor)?),
        None => None,
    };

    Ok(QuerySpec {
        filters,
        sort,
        limit: config.effective_limit(page.limit),
        offset,
        after,
    })
}

/// Build a [`QuerySpec`] from deserialized [`ListParams`], including keyed filters.
///
/// # Errors
///
/// Same as [`build_query_spec`].
pub fn build_list_query(schema: &Schema, params: &ListParams, config: &EngineConfig) -> Result<QuerySpec, QueryError> {
    let mut filters = params.filters.clone();
    if let Some(keyed) = &params.filter {
        for (key, value) in keyed {
            let (field, op) = conditions::split_keyed_filter(schema, key)?;
            filters.push(FilterParam {
                field: field.to_string(),
                op,
                value: value.clone(),
            });
        }
    }
    build_query_spec(schema, &filters, &params.sort, &params.page(), config)
}

/// Query over every record matching `filters`, for counting
pub(crate) fn count_query(schema: &Schema, params: &ListParams) -> Result<QuerySpec, QueryError> {
    let unpaged = ListParams {
        sort: Vec::new(),
        limit: None,
        offset: None,
        cursor: None,
        ..params.clone()
    };
    build_list_query(schema, &unpaged, &EngineConfig::default())
}
