use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::traits::Repository;
use crate::config::EngineConfig;
use crate::errors::{EngineError, RepoError, SchemaError};
use crate::filtering::{self, ListPage, QuerySpec};
use crate::models::ListParams;
use crate::schema::{IdentityPolicy, Schema};
use crate::validation::{self, Mode, ValidationError, ValidationErrors, ViolationKind};
use crate::value::{Identity, Record, Value};

/// CRUD operations for one resource, derived from its schema.
///
/// The engine validates input, builds queries, calls the repository and maps its conditions to
/// [`EngineError`]. It holds no mutable state: share it behind an `Arc` and call it from any
/// number of tasks.
///
/// ```rust,ignore
/// let engine = ResourceEngine::register(schema, Arc::new(repository))?
///     .with_config(EngineConfig { default_limit: 20, max_limit: 200 });
///
/// let ann = engine.create(&json!({"name": "Ann"})).await?;
/// let id = ann.identity(engine.schema()).unwrap();
/// let ann = engine.update(id, &json!({"age": 31}), ann.version()).await?;
/// ```
#[derive(Clone)]
pub struct ResourceEngine {
    schema: Schema,
    repository: Arc<dyn Repository>,
    config: EngineConfig,
}

impl std::fmt::Debug for ResourceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEngine")
            .field("schema", &self.schema.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResourceEngine {
    /// Bind a resource schema to a repository.
    ///
    /// # Errors
    ///
    /// `SchemaError::EmptyIdentity` for embedded schemas, which cannot back a resource.
    pub fn register(schema: Schema, repository: Arc<dyn Repository>) -> Result<Self, SchemaError> {
        if !schema.has_identity() {
            return Err(SchemaError::EmptyIdentity {
                schema: schema.name().to_string(),
            });
        }
        debug!(resource = %schema.name(), "registered resource");
        Ok(Self {
            schema,
            repository,
            config: EngineConfig::default(),
        })
    }

    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `input` as a full record and store it.
    ///
    /// # Errors
    ///
    /// `Validation`, `AlreadyExists` when the identity is taken, `Unavailable`, `Backend`.
    pub async fn create(&self, input: &JsonValue) -> Result<Record, EngineError> {
        let mut record = validation::validate(&self.schema, input, Mode::Create)?;
        if self.schema.identity_policy() == IdentityPolicy::EngineGenerated && record.identity(&self.schema).is_none()
        {
            if let [key] = self.schema.identity_key() {
                record.place(&self.schema, key, Value::String(Uuid::new_v4().to_string()));
            }
        }

        let identity = record.identity(&self.schema);
        debug!(
            resource = %self.schema.name(),
            identity = %identity.as_ref().map_or_else(|| "<assigned by backend>".to_string(), ToString::to_string),
            "creating record"
        );
        self.repository
            .create(record)
            .await
            .map_err(|e| self.map_error(e, identity.as_ref()))
    }

    /// # Errors
    ///
    /// `Validation` for a malformed identity, `NotFound`, `Unavailable`, `Backend`.
    pub async fn get(&self, identity: impl Into<Identity>) -> Result<Record, EngineError> {
        let identity = self.checked_identity(identity.into())?;
        debug!(resource = %self.schema.name(), identity = %identity, "reading record");
        self.repository
            .get(&identity)
            .await
            .map_err(|e| self.map_error(e, Some(&identity)))
    }

    /// Apply a partial update. Fields absent from `patch` keep their stored value.
    ///
    /// Identity fields may appear in `patch` only with their current value.
    ///
    /// # Errors
    ///
    /// `Validation` (including `ImmutableField`), `NotFound`, `Conflict` when `expected_version`
    /// is stale, `AlreadyExists` when a unique key collides, `Unavailable`, `Backend`.
    pub async fn update(
        &self,
        identity: impl Into<Identity>,
        patch: &JsonValue,
        expected_version: Option<i64>,
    ) -> Result<Record, EngineError> {
        let identity = self.checked_identity(identity.into())?;
        let mut patch = validation::validate(&self.schema, patch, Mode::Update)?;
        self.strip_identity(&identity, &mut patch)?;

        debug!(
            resource = %self.schema.name(),
            identity = %identity,
            fields = patch.len(),
            expected_version = ?expected_version,
            "updating record"
        );
        self.repository
            .update(&identity, patch, expected_version)
            .await
            .map_err(|e| self.map_error(e, Some(&identity)))
    }

    /// Overwrite every non-identity field. Absent optional fields are reset to their default or
    /// `null`, absent required fields are a validation error.
    ///
    /// # Errors
    ///
    /// Same as [`update`](Self::update).
    pub async fn replace(
        &self,
        identity: impl Into<Identity>,
        input: &JsonValue,
        expected_version: Option<i64>,
    ) -> Result<Record, EngineError> {
        let identity = self.checked_identity(identity.into())?;
        let input = match input {
            JsonValue::Object(object) => {
                let mut object = object.clone();
                for (key, value) in self.schema.identity_key().iter().zip(identity.values()) {
                    object.entry(key.clone()).or_insert_with(|| value.to_json());
                }
                JsonValue::Object(object)
            }
            other => other.clone(),
        };
        let mut record = validation::validate(&self.schema, &input, Mode::Create)?;
        self.strip_identity(&identity, &mut record)?;

        debug!(
            resource = %self.schema.name(),
            identity = %identity,
            expected_version = ?expected_version,
            "replacing record"
        );
        self.repository
            .update(&identity, record, expected_version)
            .await
            .map_err(|e| self.map_error(e, Some(&identity)))
    }

    /// Delete a record. A missing record is `NotFound`, not success.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed identity, `NotFound`, `Conflict`, `Unavailable`, `Backend`.
    pub async fn delete(&self, identity: impl Into<Identity>, expected_version: Option<i64>) -> Result<(), EngineError> {
        let identity = self.checked_identity(identity.into())?;
        debug!(
            resource = %self.schema.name(),
            identity = %identity,
            expected_version = ?expected_version,
            "deleting record"
        );
        self.repository
            .delete(&identity, expected_version)
            .await
            .map_err(|e| self.map_error(e, Some(&identity)))
    }

    /// One page of records. An empty page without `next_cursor` is the normal end of a listing.
    ///
    /// # Errors
    ///
    /// `Query` for malformed parameters, `Unavailable`, `Backend`.
    pub async fn list(&self, params: &ListParams) -> Result<ListPage, EngineError> {
        let query = self.query(params)?;
        self.list_query(&query).await
    }

    /// Run an already built query
    ///
    /// # Errors
    ///
    /// `Unavailable`, `Backend`.
    pub async fn list_query(&self, query: &QuerySpec) -> Result<ListPage, EngineError> {
        debug!(
            resource = %self.schema.name(),
            filters = query.filters().len(),
            limit = query.limit(),
            offset = query.offset(),
            keyset = query.after().is_some(),
            "listing records"
        );
        self.repository
            .list(query)
            .await
            .map_err(|e| self.map_error(e, None))
    }

    /// Build the query `list` would run, e.g. to reuse it across pages of a report
    ///
    /// # Errors
    ///
    /// `Query` for malformed parameters.
    pub fn query(&self, params: &ListParams) -> Result<QuerySpec, EngineError> {
        Ok(filtering::build_list_query(&self.schema, params, &self.config)?)
    }

    /// Number of records matching the filters of `params`; sort and pagination are ignored.
    ///
    /// # Errors
    ///
    /// `Query`, `Unavailable`, `Backend`.
    pub async fn count(&self, params: &ListParams) -> Result<u64, EngineError> {
        let query = filtering::count_query(&self.schema, params)?;
        debug!(resource = %self.schema.name(), filters = query.filters().len(), "counting records");
        self.repository
            .count(&query)
            .await
            .map_err(|e| self.map_error(e, None))
    }

    fn checked_identity(&self, identity: Identity) -> Result<Identity, EngineError> {
        validation::validate_identity(&self.schema, &identity)?;
        Ok(identity)
    }

    /// Reject identity fields that differ from the target, then drop them from the patch
    fn strip_identity(&self, identity: &Identity, patch: &mut Record) -> Result<(), EngineError> {
        let mut errors = ValidationErrors::new();
        for (key, target) in self.schema.identity_key().iter().zip(identity.values()) {
            if let Some(given) = patch.remove(key) {
                if given.sort_cmp(target) != Ordering::Equal {
                    errors.add(ValidationError::new(
                        key.as_str(),
                        ViolationKind::ImmutableField,
                        "Identity fields cannot be changed",
                    ));
                }
            }
        }
        errors.result()?;
        Ok(())
    }

    fn map_error(&self, err: RepoError, identity: Option<&Identity>) -> EngineError {
        let resource = self.schema.name().to_string();
        let identity = identity.map(ToString::to_string);
        match err {
            RepoError::Conflict(detail) => EngineError::AlreadyExists {
                resource,
                identity,
                detail,
            },
            RepoError::VersionConflict { expected, actual } => EngineError::Conflict {
                resource,
                identity,
                expected,
                actual,
            },
            RepoError::NotFound => EngineError::NotFound { resource, identity },
            RepoError::Unavailable(reason) => {
                warn!(resource = %resource, identity = ?identity, %reason, "storage unavailable");
                EngineError::Unavailable(reason)
            }
            RepoError::Backend(reason) => {
                error!(resource = %resource, identity = ?identity, %reason, "storage failure");
                EngineError::Backend(reason)
            }
        }
    }
}
