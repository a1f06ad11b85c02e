mod common;

use common::{
    PEOPLE_TABLE, engine_on, person_schema, setup_person_engine, setup_shared_test_db, setup_test_db_with,
    test_pool_config,
};
use resourcecrate::{
    Direction, EngineError, FilterOp, Identity, ListParams, MemoryRepository, PoolConfig, QueryError, Record,
    ResourceEngine, SqlRepository, Value, ViolationKind,
};
use serde_json::{Value as JsonValue, json};
use std::collections::HashSet;
use std::sync::Arc;

fn id_of(record: &Record) -> i64 {
    record.get("id").and_then(Value::as_i64).unwrap()
}

fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(id_of).collect()
}

/// 23 people with duplicate and missing ages
fn crowd() -> Vec<JsonValue> {
    (1..=23)
        .map(|i: i64| {
            let age = if i % 4 == 0 { JsonValue::Null } else { json!(20 + i % 3) };
            json!({"id": i, "name": format!("person-{:02}", 23 - i), "age": age})
        })
        .collect()
}

async fn walk(engine: &ResourceEngine, mut params: ListParams) -> Vec<i64> {
    let mut seen = Vec::new();
    loop {
        let page = engine.list(&params).await.unwrap();
        seen.extend(ids(&page.records));
        match page.next_cursor {
            Some(cursor) => params = params.cursor(cursor),
            None => return seen,
        }
    }
}

#[tokio::test]
async fn test_full_crud_cycle() {
    let (engine, _db) = setup_person_engine().await;

    let created = engine
        .create(&json!({
            "name": "Ann",
            "age": 31,
            "score": 4.5,
            "joined_at": "2024-05-01T10:00:00Z",
            "address": {"street": "Main 1", "city": "Bern"}
        }))
        .await
        .unwrap();
    let id = created.identity(engine.schema()).unwrap();
    assert_eq!(id, Identity::from(1));
    assert_eq!(created.version(), Some(1));
    assert_eq!(created.get("role"), Some(&Value::Enum("member".to_string())));
    assert_eq!(created.get("active"), Some(&Value::Bool(true)));
    assert_eq!(created.to_json()["address"]["city"], "Bern");
    assert_eq!(created.to_json()["joined_at"], json!("2024-05-01T10:00:00Z"));

    let fetched = engine.get(id.clone()).await.unwrap();
    assert_eq!(fetched, created);

    let updated = engine
        .update(id.clone(), &json!({"age": 32, "score": null}), Some(1))
        .await
        .unwrap();
    assert_eq!(updated.get("age"), Some(&Value::Integer(32)));
    assert_eq!(updated.get("score"), Some(&Value::Null));
    assert_eq!(updated.get("name"), Some(&Value::String("Ann".to_string())));
    assert_eq!(updated.version(), Some(2));

    engine.delete(id.clone(), Some(2)).await.unwrap();
    assert!(matches!(engine.get(id.clone()).await, Err(EngineError::NotFound { .. })));
    assert!(matches!(engine.delete(id, None).await, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn test_invalid_input_is_not_stored() {
    let (engine, _db) = setup_person_engine().await;

    let err = engine.create(&json!({"name": "Ann", "age": -1})).await.unwrap_err();
    let EngineError::Validation(errors) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.errors()[0].field, "age");
    assert_eq!(errors.errors()[0].kind, ViolationKind::OutOfRange);

    assert_eq!(engine.count(&ListParams::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_identity_is_already_exists() {
    let (engine, _db) = setup_person_engine().await;
    engine.create(&json!({"id": 7, "name": "Ann"})).await.unwrap();

    let err = engine.create(&json!({"id": 7, "name": "Bob"})).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { .. }), "{err:?}");
    assert_eq!(
        engine.get(7).await.unwrap().get("name"),
        Some(&Value::String("Ann".to_string()))
    );
}

#[tokio::test]
async fn test_stale_version_is_conflict() {
    let (engine, _db) = setup_person_engine().await;
    engine.create(&json!({"name": "Ann"})).await.unwrap();
    engine.update(1, &json!({"age": 3}), Some(1)).await.unwrap();

    let err = engine.update(1, &json!({"age": 4}), Some(1)).await.unwrap_err();
    assert!(
        matches!(err, EngineError::Conflict { expected: 1, actual: 2, .. }),
        "{err:?}"
    );
    let err = engine.delete(1, Some(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }), "{err:?}");

    assert_eq!(engine.get(1).await.unwrap().get("age"), Some(&Value::Integer(3)));
}

#[tokio::test]
async fn test_concurrent_updates_with_same_version_have_one_winner() {
    common::init_tracing();
    let (db, file) = setup_shared_test_db(3).await.unwrap();
    let engine = engine_on(&db);
    engine.create(&json!({"name": "Ann"})).await.unwrap();

    let (first, second, third) = (json!({"age": 1}), json!({"age": 2}), json!({"age": 3}));
    let (a, b, c) = tokio::join!(
        engine.update(1, &first, Some(1)),
        engine.update(1, &second, Some(1)),
        engine.update(1, &third, Some(1)),
    );
    let results = [a, b, c];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::Conflict { expected: 1, actual: 2, .. })))
            .count(),
        2
    );
    assert_eq!(engine.get(1).await.unwrap().version(), Some(2));

    db.close().await.unwrap();
    if let Some(file) = file {
        let _ = std::fs::remove_file(file);
    }
}

#[tokio::test]
async fn test_replace_clears_omitted_fields() {
    let (engine, _db) = setup_person_engine().await;
    engine
        .create(&json!({"name": "Ann", "age": 31, "role": "admin"}))
        .await
        .unwrap();

    let replaced = engine.replace(1, &json!({"name": "Anna"}), None).await.unwrap();
    assert_eq!(replaced.get("age"), Some(&Value::Null));
    assert_eq!(replaced.get("role"), Some(&Value::Enum("member".to_string())));
    assert_eq!(replaced.version(), Some(2));
}

#[tokio::test]
async fn test_filters() {
    let (engine, _db) = setup_person_engine().await;
    let report = engine
        .create_many(&[
            json!({"name": "Anne", "age": 30, "role": "admin"}),
            json!({"name": "joANNa", "age": 17}),
            json!({"name": "Bob"}),
            json!({"name": "100%_sure", "age": 50, "role": "guest"}),
        ])
        .await;
    assert!(report.is_complete());

    let list = |params: JsonValue| {
        let engine = engine.clone();
        async move {
            let params: ListParams = serde_json::from_value(params).unwrap();
            ids(&engine.list(&params).await.unwrap().records)
        }
    };

    assert_eq!(list(json!({"filter": {"name_like": "ann"}})).await, vec![1, 2]);
    assert_eq!(list(json!({"filter": {"name_like": "%_"}})).await, vec![4]);
    assert_eq!(list(json!({"filter": {"age_gte": 18}})).await, vec![1, 4]);
    assert_eq!(list(json!({"filter": {"age": null}})).await, vec![3]);
    assert_eq!(list(json!({"filter": {"age_ne": null, "age_lt": 40}})).await, vec![1, 2]);
    assert_eq!(list(json!({"filter": {"role_in": ["admin", "guest"]}})).await, vec![1, 4]);
    assert_eq!(list(json!({"filter": {"role_ne": "member"}})).await, vec![1, 4]);

    let params = ListParams::default().filter("age", FilterOp::Gt, 20);
    assert_eq!(engine.count(&params).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unsupported_operator_is_rejected_before_storage() {
    let (engine, _db) = setup_person_engine().await;
    let params = ListParams::default().filter("age", FilterOp::Contains, "3");
    let err = engine.list(&params).await.unwrap_err();
    assert!(
        matches!(&err, EngineError::Query(QueryError::UnsupportedOperator { field, .. }) if field == "age"),
        "{err:?}"
    );

    let params = ListParams::default().filter("nickname", FilterOp::Eq, "x");
    assert!(matches!(
        engine.list(&params).await,
        Err(EngineError::Query(QueryError::UnknownField(_)))
    ));
}

#[tokio::test]
async fn test_cursor_pagination_visits_every_record_once() {
    let (engine, _db) = setup_person_engine().await;
    assert!(engine.create_many(&crowd()).await.is_complete());

    let params = ListParams::default().sort_by("age", Direction::Desc).limit(4);
    let first = walk(&engine, params.clone()).await;
    let second = walk(&engine, params).await;

    assert_eq!(first.len(), 23);
    assert_eq!(first.iter().collect::<HashSet<_>>().len(), 23);
    assert_eq!(first, second);

    let ascending = walk(&engine, ListParams::default().sort_by("age", Direction::Asc).limit(5)).await;
    assert_eq!(ascending.len(), 23);
    // nulls first ascending
    assert_eq!(&ascending[..5], &[4, 8, 12, 16, 20]);
}

#[tokio::test]
async fn test_sql_and_memory_pages_agree() {
    let (sql, _db) = setup_person_engine().await;
    let schema = person_schema();
    let memory = ResourceEngine::register(schema.clone(), Arc::new(MemoryRepository::new(schema))).unwrap();
    assert!(sql.create_many(&crowd()).await.is_complete());
    assert!(memory.create_many(&crowd()).await.is_complete());

    for params in [
        ListParams::default().sort_by("age", Direction::Desc).limit(3),
        ListParams::default()
            .sort_by("age", Direction::Asc)
            .sort_by("name", Direction::Desc)
            .limit(7),
        ListParams::default().sort_by("name", Direction::Asc).limit(10),
        ListParams::default().filter("age", FilterOp::In, json!([20, 22])).limit(2),
    ] {
        assert_eq!(walk(&sql, params.clone()).await, walk(&memory, params).await);
    }

    for engine in [&sql, &memory] {
        engine.create(&json!({"id": 100, "name": "ärger"})).await.unwrap();
        engine.create(&json!({"id": 101, "name": "Ärmel"})).await.unwrap();
    }
    for needle in ["ÄR", "är", "RGER", "äRG"] {
        let params = ListParams::default().filter("name", FilterOp::Contains, needle).limit(5);
        assert_eq!(walk(&sql, params.clone()).await, walk(&memory, params).await, "{needle}");
    }
    let params = ListParams::default().filter("name", FilterOp::Contains, "RGER");
    assert_eq!(walk(&sql, params).await, vec![100]);

    let offset = ListParams::default().sort_by("age", Direction::Desc).limit(5).offset(5);
    assert_eq!(
        ids(&sql.list(&offset).await.unwrap().records),
        ids(&memory.list(&offset).await.unwrap().records)
    );
}

#[tokio::test]
async fn test_bulk_operations() {
    let (engine, _db) = setup_person_engine().await;
    let created = engine
        .create_many(&[json!({"name": "Ann"}), json!({"name": ""}), json!({"name": "Cid"})])
        .await;
    assert_eq!(ids(&created.succeeded), vec![1, 2]);
    assert_eq!(created.failed[0].index, 1);

    let updated = engine
        .update_many(&[json!({"id": 2, "age": 40}), json!({"id": 99, "age": 1})])
        .await;
    assert_eq!(ids(&updated.succeeded), vec![2]);
    assert!(matches!(updated.failed[0].error, EngineError::NotFound { .. }));

    let deleted = engine.delete_many(vec![Identity::from(1), Identity::from(2)]).await;
    assert!(deleted.is_complete());
    assert_eq!(engine.count(&ListParams::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pool_exhaustion_is_unavailable() {
    common::init_tracing();
    let config = PoolConfig {
        acquire_timeout_ms: 200,
        acquire_retries: 1,
        ..test_pool_config()
    };
    let db = setup_test_db_with(&config).await.unwrap();
    let schema = person_schema();
    let repository = SqlRepository::new(db.clone(), PEOPLE_TABLE, schema.clone())
        .with_acquire_retries(config.acquire_retries);
    let engine = ResourceEngine::register(schema, Arc::new(repository)).unwrap();
    engine.create(&json!({"name": "Ann"})).await.unwrap();

    let held = sea_orm::TransactionTrait::begin(&db).await.unwrap();
    let err = engine.get(1).await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)), "{err:?}");
    assert!(err.is_retryable());

    drop(held);
    assert!(engine.get(1).await.is_ok());
}
