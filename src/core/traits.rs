use async_trait::async_trait;

use crate::errors::RepoError;
use crate::filtering::{ListPage, QuerySpec};
use crate::value::{Identity, Record};

/// Storage backend contract.
///
/// A repository is bound to one schema. Every method is atomic per record: a failed call leaves
/// the stored record as it was. Versions start at 1 and grow by one with every successful update.
///
/// Implementations report conditions, they do not retry statements. Mapping to caller-facing
/// errors happens in [`ResourceEngine`](super::ResourceEngine).
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a validated record.
    ///
    /// Identity fields may be absent, in which case the backend assigns them. Returns the stored
    /// record with its identity and version 1.
    ///
    /// # Errors
    ///
    /// `Conflict` when the identity already exists, `Unavailable` when storage cannot be reached.
    async fn create(&self, record: Record) -> Result<Record, RepoError>;

    /// # Errors
    ///
    /// `NotFound` or `Unavailable`.
    async fn get(&self, identity: &Identity) -> Result<Record, RepoError>;

    /// Merge `patch` into the stored record and bump its version.
    ///
    /// Fields absent from `patch` are left untouched. With `expected_version` the write only
    /// happens if the stored version still matches; without it the last write wins.
    ///
    /// # Errors
    ///
    /// `NotFound`, `VersionConflict`, `Conflict` (a unique key collides) or `Unavailable`.
    async fn update(&self, identity: &Identity, patch: Record, expected_version: Option<i64>)
    -> Result<Record, RepoError>;

    /// # Errors
    ///
    /// `NotFound`, `VersionConflict` or `Unavailable`.
    async fn delete(&self, identity: &Identity, expected_version: Option<i64>) -> Result<(), RepoError>;

    /// One page of records matching `query`, in its sort order.
    ///
    /// # Errors
    ///
    /// `Unavailable`.
    async fn list(&self, query: &QuerySpec) -> Result<ListPage, RepoError>;

    /// Number of records matching the filters of `query`; sort and pagination are ignored.
    ///
    /// # Errors
    ///
    /// `Unavailable`.
    async fn count(&self, query: &QuerySpec) -> Result<u64, RepoError>;
}
