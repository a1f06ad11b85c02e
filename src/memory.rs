//! In-process repository.
//!
//! Keeps records in a `HashMap` behind a `tokio::sync::RwLock`. Every check-and-write happens
//! under one write lock, which makes each operation atomic per record. Filtering, ordering and
//! cursors reuse [`QuerySpec`]'s own evaluation, so results match the SQL repository's.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::Repository;
use crate::errors::RepoError;
use crate::filtering::{ListPage, QuerySpec};
use crate::schema::{FieldType, Schema};
use crate::value::{Identity, Record, Value};

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Record>,
    /// Highest integer identity seen so far
    last_id: i64,
}

#[derive(Debug)]
pub struct MemoryRepository {
    schema: Schema,
    state: RwLock<State>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            state: RwLock::new(State::default()),
        }
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Assign the identity a backend would: next integer, or a UUID string
    fn assign_identity(&self, state: &mut State, record: &mut Record) -> Result<(), RepoError> {
        let [key] = self.schema.identity_key() else {
            return Err(RepoError::Backend(format!(
                "composite identity of `{}` must be supplied by the caller",
                self.schema.name()
            )));
        };
        let value = match self.schema.field(key).map(|f| f.field_type()) {
            Some(FieldType::Integer) => Value::Integer(state.last_id.checked_add(1).ok_or_else(|| {
                RepoError::Backend(format!("integer identities of `{}` are exhausted", self.schema.name()))
            })?),
            Some(FieldType::String) => Value::String(Uuid::new_v4().to_string()),
            _ => {
                return Err(RepoError::Backend(format!(
                    "cannot generate a value for identity field `{key}`"
                )));
            }
        };
        record.place(&self.schema, key, value);
        Ok(())
    }
}

fn stale(expected: Option<i64>, stored: &Record) -> Option<RepoError> {
    let actual = stored.version().unwrap_or(1);
    expected
        .filter(|&expected| expected != actual)
        .map(|expected| RepoError::VersionConflict { expected, actual })
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create(&self, mut record: Record) -> Result<Record, RepoError> {
        let mut state = self.state.write().await;
        if record.identity(&self.schema).is_none() {
            self.assign_identity(&mut state, &mut record)?;
        }
        let identity = record
            .identity(&self.schema)
            .ok_or_else(|| RepoError::Backend("record has no identity".to_string()))?;

        let key = identity.storage_key();
        if state.records.contains_key(&key) {
            return Err(RepoError::Conflict(format!("{} {identity} already exists", self.schema.name())));
        }
        if let [Value::Integer(id)] = identity.values() {
            state.last_id = state.last_id.max(*id);
        }
        record.set_version(1);
        state.records.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, identity: &Identity) -> Result<Record, RepoError> {
        self.state
            .read()
            .await
            .records
            .get(&identity.storage_key())
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update(&self, identity: &Identity, patch: Record, expected_version: Option<i64>) -> Result<Record, RepoError> {
        let mut state = self.state.write().await;
        let stored = state
            .records
            .get_mut(&identity.storage_key())
            .ok_or(RepoError::NotFound)?;
        if let Some(conflict) = stale(expected_version, stored) {
            return Err(conflict);
        }
        let version = stored.version().unwrap_or(1) + 1;
        stored.merge(&self.schema, patch);
        stored.set_version(version);
        Ok(stored.clone())
    }

    async fn delete(&self, identity: &Identity, expected_version: Option<i64>) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let key = identity.storage_key();
        let stored = state.records.get(&key).ok_or(RepoError::NotFound)?;
        if let Some(conflict) = stale(expected_version, stored) {
            return Err(conflict);
        }
        state.records.remove(&key);
        Ok(())
    }

    async fn list(&self, query: &QuerySpec) -> Result<ListPage, RepoError> {
        let state = self.state.read().await;
        Ok(query.apply(state.records.values()))
    }

    async fn count(&self, query: &QuerySpec) -> Result<u64, RepoError> {
        let state = self.state.read().await;
        let matching = state.records.values().filter(|r| query.matches(r)).count();
        Ok(u64::try_from(matching).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, IdentityPolicy};
    use crate::validation::{Mode, ViolationKind, validate};
    use serde_json::json;

    fn people() -> Schema {
        Schema::define(
            "person",
            vec![Field::integer("id"), Field::string("name").required(), Field::integer("age")],
            "id",
        )
        .unwrap()
    }

    fn input(schema: &Schema, value: &serde_json::Value) -> Record {
        validate(schema, value, Mode::Create).unwrap()
    }

    #[tokio::test]
    async fn test_generated_ids_skip_caller_assigned_ones() {
        let schema = people();
        let repo = MemoryRepository::new(schema.clone());

        repo.create(input(&schema, &json!({"id": 5, "name": "Ann"}))).await.unwrap();
        let bob = repo.create(input(&schema, &json!({"name": "Bob"}))).await.unwrap();
        assert_eq!(bob.get("id"), Some(&Value::Integer(6)));
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn test_string_identity_gets_a_uuid() {
        let schema = Schema::define("tag", vec![Field::string("slug"), Field::string("label")], "slug").unwrap();
        let repo = MemoryRepository::new(schema.clone());
        let tag = repo.create(input(&schema, &json!({"label": "rust"}))).await.unwrap();
        assert!(Uuid::parse_str(tag.get("slug").and_then(Value::as_str).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_composite_identity_must_be_supplied() {
        let schema = Schema::builder("membership")
            .field(Field::string("org"))
            .field(Field::integer("user"))
            .identity(["org", "user"])
            .build()
            .unwrap();
        assert_eq!(schema.identity_policy(), IdentityPolicy::CallerAssigned);
        let repo = MemoryRepository::new(schema.clone());

        let errors = validate(&schema, &json!({"org": "eu"}), Mode::Create).unwrap_err();
        assert_eq!(errors.errors()[0].field, "user");
        assert_eq!(errors.errors()[0].kind, ViolationKind::Missing);

        let member = repo.create(input(&schema, &json!({"org": "eu", "user": 3}))).await.unwrap();
        let identity = member.identity(&schema).unwrap();
        assert_eq!(repo.get(&identity).await.unwrap(), member);
        assert!(matches!(
            repo.create(input(&schema, &json!({"org": "eu", "user": 3}))).await,
            Err(RepoError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_integer_identity_sequence_does_not_overflow() {
        let schema = people();
        let repo = MemoryRepository::new(schema.clone());

        repo.create(input(&schema, &json!({"id": i64::MAX, "name": "Ann"}))).await.unwrap();
        let err = repo.create(input(&schema, &json!({"name": "Bob"}))).await.unwrap_err();
        assert!(matches!(err, RepoError::Backend(_)), "{err:?}");
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_checks_version_before_writing() {
        let schema = people();
        let repo = MemoryRepository::new(schema.clone());
        let ann = repo.create(input(&schema, &json!({"name": "Ann"}))).await.unwrap();
        let id = ann.identity(&schema).unwrap();

        let patch = validate(&schema, &json!({"age": 3}), Mode::Update).unwrap();
        let err = repo.update(&id, patch.clone(), Some(4)).await.unwrap_err();
        assert_eq!(err, RepoError::VersionConflict { expected: 4, actual: 1 });
        assert_eq!(repo.get(&id).await.unwrap().get("age"), Some(&Value::Null));

        let updated = repo.update(&id, patch, Some(1)).await.unwrap();
        assert_eq!(updated.get("age"), Some(&Value::Integer(3)));
        assert_eq!(updated.version(), Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_stale_updates_have_one_winner() {
        let schema = people();
        let repo = std::sync::Arc::new(MemoryRepository::new(schema.clone()));
        let ann = repo.create(input(&schema, &json!({"name": "Ann"}))).await.unwrap();
        let id = ann.identity(&schema).unwrap();

        let attempt = |age: i64| {
            let repo = repo.clone();
            let id = id.clone();
            let patch = validate(&schema, &json!({ "age": age }), Mode::Update).unwrap();
            async move { repo.update(&id, patch, Some(1)).await }
        };
        let (a, b, c) = tokio::join!(attempt(1), attempt(2), attempt(3));

        let results = [a, b, c];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(RepoError::VersionConflict { expected: 1, actual: 2 })))
                .count(),
            2
        );
    }
}
