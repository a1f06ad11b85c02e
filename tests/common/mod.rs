#![allow(dead_code)]

use resourcecrate::{Field, PoolConfig, ResourceEngine, Schema, SqlRepository};
use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub const PEOPLE_TABLE: &str = "people";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn address_schema() -> Schema {
    Schema::embedded(
        "address",
        vec![Field::string("street").required(), Field::string("city")],
    )
    .unwrap()
}

pub fn person_schema() -> Schema {
    Schema::define(
        "person",
        vec![
            Field::integer("id"),
            Field::string("name").required().min_length(1).max_length(80),
            Field::integer("age").min(0).max(150),
            Field::float("score"),
            Field::enumeration("role", ["admin", "member", "guest"]).default_value("member"),
            Field::boolean("active").default_value(true),
            Field::timestamp("joined_at"),
            Field::nested("address", address_schema()),
        ],
        "id",
    )
    .unwrap()
}

/// Pool config for tests: `DATABASE_URL` or an in-memory SQLite database.
///
/// A single long-lived connection keeps an in-memory database alive for the whole test.
pub fn test_pool_config() -> PoolConfig {
    let mut config = PoolConfig::from_env().unwrap_or_default();
    config.max_connections = 1;
    config.min_connections = 1;
    config
}

pub async fn setup_test_db_with(config: &PoolConfig) -> Result<DatabaseConnection, DbErr> {
    let db = config.connect().await?;

    // Run migrations
    Migrator::up(&db, None).await?;

    Ok(db)
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    setup_test_db_with(&test_pool_config()).await
}

/// A database several pooled connections can reach at once: `DATABASE_URL`, or a fresh SQLite
/// file in the temp directory. Returns the file to remove afterwards.
pub async fn setup_shared_test_db(connections: u32) -> Result<(DatabaseConnection, Option<PathBuf>), DbErr> {
    let mut config = PoolConfig::from_env().unwrap_or_default();
    let file = if std::env::var("DATABASE_URL").is_ok() {
        None
    } else {
        let path = std::env::temp_dir().join(format!("resourcecrate-{}.db", Uuid::new_v4()));
        config.url = format!("sqlite://{}?mode=rwc", path.display());
        Some(path)
    };
    config.max_connections = connections;
    config.min_connections = connections;
    let db = setup_test_db_with(&config).await?;
    Ok((db, file))
}

pub fn engine_on(db: &DatabaseConnection) -> ResourceEngine {
    let schema = person_schema();
    let repository = SqlRepository::new(db.clone(), PEOPLE_TABLE, schema.clone());
    ResourceEngine::register(schema, Arc::new(repository)).unwrap()
}

pub async fn setup_person_engine() -> (ResourceEngine, DatabaseConnection) {
    init_tracing();
    let db = setup_test_db().await.expect("database setup");
    (engine_on(&db), db)
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreatePeopleTable)]
    }
}

pub struct CreatePeopleTable;

#[async_trait::async_trait]
impl MigrationName for CreatePeopleTable {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_people_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreatePeopleTable {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = Table::create()
            .table(People::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(People::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(People::Name).string().not_null())
            .col(ColumnDef::new(People::Age).integer())
            .col(ColumnDef::new(People::Score).double())
            .col(ColumnDef::new(People::Role).string())
            .col(ColumnDef::new(People::Active).boolean())
            .col(ColumnDef::new(People::JoinedAt).timestamp_with_time_zone())
            .col(ColumnDef::new(People::Address).text())
            .col(
                ColumnDef::new(People::Version)
                    .big_integer()
                    .not_null()
                    .default(1),
            )
            .to_owned();

        manager.create_table(table).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(People::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum People {
    Table,
    Id,
    Name,
    Age,
    Score,
    Role,
    Active,
    JoinedAt,
    Address,
    Version,
}

impl Iden for People {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "people",
                Self::Id => "id",
                Self::Name => "name",
                Self::Age => "age",
                Self::Score => "score",
                Self::Role => "role",
                Self::Active => "active",
                Self::JoinedAt => "joined_at",
                Self::Address => "address",
                Self::Version => "version",
            }
        )
        .unwrap();
    }
}
