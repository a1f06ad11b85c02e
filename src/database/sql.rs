use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, QueryResult, TransactionTrait,
};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::statements::Layout;
use crate::config::PoolConfig;
use crate::core::Repository;
use crate::errors::RepoError;
use crate::filtering::{ListPage, QuerySpec};
use crate::schema::{Field, FieldType, Schema};
use crate::validation::{ValidationErrors, coerce_field};
use crate::value::{Identity, Record, Value};

const DEFAULT_VERSION_COLUMN: &str = "version";
const DEFAULT_ACQUIRE_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Repository over one table of a Sea-ORM connection pool.
///
/// The table holds one column per schema field, named after the field, plus an integer version
/// column. Nested fields are stored as JSON text. Every operation runs in its own transaction,
/// so the version check and the write of `update`/`delete` happen atomically.
#[derive(Debug, Clone)]
pub struct SqlRepository {
    db: DatabaseConnection,
    layout: Layout,
    acquire_retries: u32,
}

impl SqlRepository {
    #[must_use]
    pub fn new(db: DatabaseConnection, table: impl Into<String>, schema: Schema) -> Self {
        Self {
            db,
            layout: Layout {
                table: table.into(),
                version: DEFAULT_VERSION_COLUMN.to_string(),
                schema,
            },
            acquire_retries: DEFAULT_ACQUIRE_RETRIES,
        }
    }

    /// Open a pool from `config` and serve `table` through it.
    ///
    /// # Errors
    ///
    /// `RepoError::Unavailable` when the database cannot be reached.
    pub async fn connect(config: &PoolConfig, table: impl Into<String>, schema: Schema) -> Result<Self, RepoError> {
        let db = config.connect().await?;
        Ok(Self::new(db, table, schema).with_acquire_retries(config.acquire_retries))
    }

    #[must_use]
    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.layout.version = column.into();
        self
    }

    /// Extra attempts when the pool has no free connection
    #[must_use]
    pub const fn with_acquire_retries(mut self, retries: u32) -> Self {
        self.acquire_retries = retries;
        self
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.layout.schema
    }

    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Start a transaction, retrying pool exhaustion with a linear backoff
    async fn begin(&self) -> Result<DatabaseTransaction, RepoError> {
        let mut attempt = 0;
        loop {
            match self.db.begin().await {
                Ok(txn) => return Ok(txn),
                Err(DbErr::ConnectionAcquire(err)) if attempt < self.acquire_retries => {
                    attempt += 1;
                    warn!(table = %self.layout.table, attempt, error = %err, "connection acquire failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Identity the backend assigns when the caller left it out
    fn generated_identity(&self, record: &mut Record) -> Result<(), RepoError> {
        if record.identity(self.schema()).is_some() {
            return Ok(());
        }
        match self.schema().identity_key() {
            [key] if matches!(self.field_type(key), Some(FieldType::String)) => {
                record.place(self.schema(), key, Value::String(Uuid::new_v4().to_string()));
                Ok(())
            }
            [key] if matches!(self.field_type(key), Some(FieldType::Integer)) => Ok(()),
            _ => Err(RepoError::Backend(format!(
                "identity of `{}` must be supplied by the caller",
                self.schema().name()
            ))),
        }
    }

    fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.schema().field(name).map(Field::field_type)
    }

    /// Explain why a versioned write touched no row
    async fn missed(&self, txn: &DatabaseTransaction, identity: &Identity, expected: Option<i64>) -> RepoError {
        let backend = txn.get_database_backend();
        match txn.query_one(backend.build(&self.layout.select_version(identity))).await {
            Ok(Some(row)) => match read_i64(&row, &self.layout.version) {
                Ok(Some(actual)) => RepoError::VersionConflict {
                    expected: expected.unwrap_or(actual),
                    actual,
                },
                Ok(None) => RepoError::Backend(format!("`{}` has a null version", self.layout.table)),
                Err(err) => err.into(),
            },
            Ok(None) => RepoError::NotFound,
            Err(err) => err.into(),
        }
    }

    fn decode(&self, row: &QueryResult) -> Result<Record, RepoError> {
        let schema = self.schema();
        let mut values = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            values.push((field.name().to_string(), decode_column(row, field)?));
        }
        let version = read_i64(row, &self.layout.version)?
            .ok_or_else(|| RepoError::Backend(format!("`{}` has a null version", self.layout.table)))?;
        Record::from_stored(schema, values, version)
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn create(&self, mut record: Record) -> Result<Record, RepoError> {
        self.generated_identity(&mut record)?;
        let txn = self.begin().await?;
        let backend = txn.get_database_backend();
        let returning = txn.support_returning();
        let insert = self.layout.insert(&record, returning)?;

        let row = if returning {
            txn.query_one(backend.build(&insert)).await?
        } else {
            let result = txn.execute(backend.build(&insert)).await?;
            let identity = match record.identity(self.schema()) {
                Some(identity) => identity,
                None => {
                    let id = i64::try_from(result.last_insert_id())
                        .map_err(|_| RepoError::Backend("inserted id out of range".to_string()))?;
                    Identity::from(id)
                }
            };
            txn.query_one(backend.build(&self.layout.select_one(&identity))).await?
        };
        let row = row.ok_or_else(|| RepoError::Backend(format!("insert into `{}` returned no row", self.layout.table)))?;
        let created = self.decode(&row)?;
        txn.commit().await?;
        debug!(table = %self.layout.table, "inserted row");
        Ok(created)
    }

    async fn get(&self, identity: &Identity) -> Result<Record, RepoError> {
        let txn = self.begin().await?;
        let backend = txn.get_database_backend();
        let row = txn
            .query_one(backend.build(&self.layout.select_one(identity)))
            .await?
            .ok_or(RepoError::NotFound)?;
        let record = self.decode(&row)?;
        txn.commit().await?;
        Ok(record)
    }

    async fn update(&self, identity: &Identity, patch: Record, expected_version: Option<i64>) -> Result<Record, RepoError> {
        let txn = self.begin().await?;
        let backend = txn.get_database_backend();
        let returning = txn.support_returning();
        let update = self.layout.update(identity, &patch, expected_version, returning);

        let row = if returning {
            txn.query_one(backend.build(&update)).await?
        } else if txn.execute(backend.build(&update)).await?.rows_affected() == 0 {
            None
        } else {
            txn.query_one(backend.build(&self.layout.select_one(identity))).await?
        };
        let Some(row) = row else {
            return Err(self.missed(&txn, identity, expected_version).await);
        };
        let updated = self.decode(&row)?;
        txn.commit().await?;
        Ok(updated)
    }

    async fn delete(&self, identity: &Identity, expected_version: Option<i64>) -> Result<(), RepoError> {
        let txn = self.begin().await?;
        let backend = txn.get_database_backend();
        let result = txn
            .execute(backend.build(&self.layout.delete(identity, expected_version)))
            .await?;
        if result.rows_affected() == 0 {
            return Err(self.missed(&txn, identity, expected_version).await);
        }
        txn.commit().await?;
        Ok(())
    }

    async fn list(&self, query: &QuerySpec) -> Result<ListPage, RepoError> {
        let txn = self.begin().await?;
        let backend = txn.get_database_backend();
        let rows = txn.query_all(backend.build(&self.layout.select_page(query))).await?;
        txn.commit().await?;
        let records = rows.iter().map(|row| self.decode(row)).collect::<Result<Vec<_>, _>>()?;
        Ok(query.paginate(records))
    }

    async fn count(&self, query: &QuerySpec) -> Result<u64, RepoError> {
        let txn = self.begin().await?;
        let backend = txn.get_database_backend();
        let row = txn.query_one(backend.build(&self.layout.count(query))).await?;
        txn.commit().await?;
        let count = match row {
            Some(row) => read_i64(&row, "count")?.unwrap_or(0),
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Integers come back as `i32` from some backends
fn read_i64(row: &QueryResult, column: &str) -> Result<Option<i64>, DbErr> {
    row.try_get::<Option<i64>>("", column)
        .or_else(|_| row.try_get::<Option<i32>>("", column).map(|v| v.map(i64::from)))
}

fn decode_column(row: &QueryResult, field: &Field) -> Result<Value, RepoError> {
    let name = field.name();
    let value = match field.field_type() {
        FieldType::String => row.try_get::<Option<String>>("", name)?.map(Value::String),
        FieldType::Enum(_) => row.try_get::<Option<String>>("", name)?.map(Value::Enum),
        FieldType::Integer => read_i64(row, name)?.map(Value::Integer),
        FieldType::Float => row.try_get::<Option<f64>>("", name)?.map(Value::Float),
        FieldType::Boolean => row.try_get::<Option<bool>>("", name)?.map(Value::Bool),
        FieldType::Timestamp => row.try_get::<Option<DateTime<Utc>>>("", name)?.map(Value::Timestamp),
        FieldType::Nested(_) => match row.try_get::<Option<String>>("", name)? {
            Some(text) => Some(decode_nested(field, &text)?),
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_nested(field: &Field, text: &str) -> Result<Value, RepoError> {
    let raw: JsonValue = serde_json::from_str(text)
        .map_err(|e| RepoError::Backend(format!("stored `{}` is not JSON: {e}", field.name())))?;
    let mut errors = ValidationErrors::new();
    match coerce_field(field, &raw, field.name(), &mut errors) {
        Some(value) if errors.is_empty() => Ok(value),
        _ => Err(RepoError::Backend(format!(
            "stored `{}` does not match its schema: {}",
            field.name(),
            serde_json::to_string(&errors).unwrap_or_default()
        ))),
    }
}
