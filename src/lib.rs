//! # resourcecrate
//!
//! Schema-driven CRUD for resources stored behind an async repository.
//!
//! Describe a resource once as a [`Schema`], register it with a [`Repository`] and the
//! [`ResourceEngine`] gives you validated create, read, update, replace and delete, filtered
//! and sorted listing with offset or cursor pagination, and bulk operations.
//!
//! ```rust,ignore
//! use resourcecrate::{Field, FilterOp, ListParams, MemoryRepository, ResourceEngine, Schema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let schema = Schema::define(
//!     "person",
//!     vec![
//!         Field::integer("id"),
//!         Field::string("name").required().max_length(80),
//!         Field::integer("age").min(0),
//!     ],
//!     "id",
//! )?;
//! let engine = ResourceEngine::register(schema.clone(), Arc::new(MemoryRepository::new(schema)))?;
//!
//! let ann = engine.create(&json!({"name": "Ann", "age": 31})).await?;
//! let adults = engine
//!     .list(&ListParams::default().filter("age", FilterOp::Gte, json!(18)).limit(20))
//!     .await?;
//! ```
//!
//! Two repositories ship with the crate: [`MemoryRepository`] for tests and embedding, and
//! [`SqlRepository`] over any Sea-ORM connection (`sqlite`, `postgresql` and `mysql` features).

pub mod config;
pub mod core;
pub mod database;
pub mod errors;
pub mod filtering;
pub mod memory;
pub mod models;
pub mod schema;
pub mod validation;
pub mod value;

pub use config::{ConfigError, EngineConfig, PoolConfig};
pub use crate::core::{BulkFailure, BulkReport, Repository, ResourceEngine};
pub use database::SqlRepository;
pub use errors::{EngineError, QueryError, RepoError, SchemaError};
pub use filtering::{Direction, FilterOp, ListPage, QuerySpec, SortKey};
pub use memory::MemoryRepository;
pub use models::{FilterParam, ListParams, PageParams, SortParam};
pub use schema::{Bound, Field, FieldType, IdentityPolicy, Schema, SchemaBuilder};
pub use validation::{Mode, ValidationError, ValidationErrors, ViolationKind, validate};
pub use value::{Identity, Record, Value};
