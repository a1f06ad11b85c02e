//! # Error Taxonomy
//!
//! Every layer of the engine reports failures with its own error type:
//!
//! - [`SchemaError`]: a malformed resource definition. Only raised at registration time.
//! - [`ValidationErrors`](crate::validation::ValidationErrors): caller input that violates the
//!   schema, with every violation found in one pass.
//! - [`QueryError`]: a malformed filter, sort or pagination request.
//! - [`RepoError`]: a condition reported by a storage backend.
//! - [`EngineError`]: what callers of [`ResourceEngine`](crate::core::ResourceEngine) see.
//!
//! Only the `Unavailable` kinds are worth retrying, and nothing in the engine retries on its own.
//! Transport adapters decide how each kind maps to their status codes.
//!
//! ## Logging
//!
//! Backend failures are logged through `tracing` where they are remapped. Install a subscriber
//! in your application to see them:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_target(false)
//!     .compact()
//!     .init();
//! ```

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::validation::ValidationErrors;

/// A resource definition that cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Schema names are used in cursors and log fields and must not be blank
    #[error("schema name must not be empty")]
    EmptyName,

    /// The schema was defined for a resource but declares no identity key
    #[error("schema `{schema}` declares no identity key")]
    EmptyIdentity { schema: String },

    /// An identity key component is not one of the schema's fields
    #[error("schema `{schema}`: identity key field `{field}` is not defined")]
    MissingIdentity { schema: String, field: String },

    /// Two fields share a name
    #[error("schema `{schema}`: field `{field}` is defined more than once")]
    DuplicateField { schema: String, field: String },

    /// A nested schema refers back to the schema being defined
    #[error("schema `{schema}`: nested field path `{path}` creates a cycle")]
    NestedCycle { schema: String, path: String },

    /// A constraint or default value that can never be satisfied or does not fit the field type
    #[error("field `{field}`: {reason}")]
    InvalidConstraint { field: String, reason: String },

    /// An identity field of an unusable type, or an identity policy the key cannot honour
    #[error("identity field `{field}`: {reason}")]
    InvalidIdentity { field: String, reason: String },
}

/// A list request that cannot be turned into a [`QuerySpec`](crate::filtering::QuerySpec).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("operator `{op}` is not supported on field `{field}`")]
    UnsupportedOperator { field: String, op: String },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    /// The cursor is malformed, tampered with, or was issued for another sort order
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
}

/// Conditions a [`Repository`](crate::core::Repository) reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,

    /// The identity (or another unique key) already exists
    #[error("conflicting record: {0}")]
    Conflict(String),

    /// The stored version differs from the one the caller expected
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    /// Storage could not be reached in time, e.g. pool exhaustion. Safe to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure (decoding, malformed statement). Not retryable.
    #[error("storage failure: {0}")]
    Backend(String),
}

impl RepoError {
    /// Whether the caller may retry the same request
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Convert Sea-ORM `DbErr` to `RepoError`
///
/// **Conversion Rules:**
/// - unique constraint violations → `Conflict`
/// - connection acquisition and connection failures → `Unavailable`
/// - `DbErr::RecordNotFound` → `NotFound`
/// - everything else → `Backend`
impl From<DbErr> for RepoError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return Self::Conflict(detail);
        }
        match err {
            DbErr::ConnectionAcquire(acquire) => Self::Unavailable(acquire.to_string()),
            DbErr::Conn(conn) => Self::Unavailable(conn.to_string()),
            DbErr::RecordNotFound(_) => Self::NotFound,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Errors returned by [`ResourceEngine`](crate::core::ResourceEngine) operations.
///
/// Repository errors are remapped per CRUD intent: a duplicate identity on create becomes
/// [`EngineError::AlreadyExists`], a stale `expected_version` becomes [`EngineError::Conflict`]
/// (re-fetch and retry), a missing record becomes [`EngineError::NotFound`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{resource} {} already exists", .identity.as_deref().unwrap_or("record"))]
    AlreadyExists {
        resource: String,
        identity: Option<String>,
        detail: String,
    },

    #[error("{resource} {} not found", .identity.as_deref().unwrap_or("record"))]
    NotFound {
        resource: String,
        identity: Option<String>,
    },

    #[error("{resource} {} was modified concurrently (expected version {expected}, found {actual})", .identity.as_deref().unwrap_or("record"))]
    Conflict {
        resource: String,
        identity: Option<String>,
        expected: i64,
        actual: i64,
    },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
