use std::collections::HashMap;
use std::time::Duration;

use eorm_core::{
    BatchExecResult, ConnectionManager, DatabaseConfig, DialectTag, EormError, ExecResult, InParam,
    Record, SoftDeleteMode, TemplateBundle, TemplateEngine, TemplateSql, Value,
};
use eorm_core::template::TemplateStatementType;
use eorm_core::Executor;
use eorm_test_support::fixtures::user_row;
use eorm_test_support::FakeDriver;
use futures::FutureExt;

fn open_sqlite(manager: &ConnectionManager, name: &str, driver: &FakeDriver) -> std::sync::Arc<eorm_core::DatabaseHandle> {
    let config = DatabaseConfig::new(DialectTag::Sqlite, "file::memory:");
    manager
        .open(name, driver.connection(), driver.catalog(), config)
        .unwrap()
}

#[tokio::test]
async fn query_builder_runs_against_a_handle_opened_through_the_manager() {
    let driver = FakeDriver::new(DialectTag::Sqlite).with_query_result(
        "SELECT * FROM users WHERE active = ?",
        vec![user_row(1, "Ada", "ada@example.com")],
    );
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);

    let rows = handle
        .table("users")
        .where_("active = ?", vec![Value::Bool(true)])
        .find()
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].str("name"), "Ada");
}

#[tokio::test]
async fn insert_then_transaction_rollback_leaves_generated_id_but_reverts_driver_state() {
    let driver = FakeDriver::new(DialectTag::Sqlite);
    driver.set_next_insert_id(7);
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);

    let mut record = Record::new();
    record.set("name", Value::Text("Grace".to_string()));
    handle.insert("users", &mut record, None).await.unwrap();
    assert_eq!(record.get("id"), Some(&Value::Int(7)));

    let result: Result<(), EormError> = handle
        .transaction(|tx| async move {
            tx.raw_execute("UPDATE users SET name = ?", &[Value::Text("Ada".to_string())])
                .await?;
            Err(EormError::NotSupported("force rollback".into()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(driver.stats().rollback_calls, 1);
    assert_eq!(driver.stats().commit_calls, 0);
}

#[tokio::test]
async fn transaction_rolls_back_and_repanics_when_body_panics() {
    let driver = FakeDriver::new(DialectTag::Sqlite);
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);

    let caught = std::panic::AssertUnwindSafe(handle.transaction::<(), _>(|tx| async move {
        tx.raw_execute("UPDATE users SET name = ?", &[Value::Text("Ada".to_string())])
            .await?;
        panic!("boom")
    }))
    .catch_unwind()
    .await;

    assert!(caught.is_err(), "panic inside the transaction body must propagate");
    assert_eq!(driver.stats().rollback_calls, 1);
    assert_eq!(driver.stats().commit_calls, 0);
}

#[tokio::test]
async fn transaction_commits_when_body_succeeds() {
    let driver = FakeDriver::new(DialectTag::Sqlite);
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);

    let affected = handle
        .transaction(|tx| async move {
            let result = tx.raw_execute("DELETE FROM users WHERE id = ?", &[Value::Int(1)]).await?;
            Ok(result.rows_affected)
        })
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(driver.stats().commit_calls, 1);
}

#[tokio::test]
async fn template_engine_runs_named_and_positional_invocations_against_a_handle() {
    let driver = FakeDriver::new(DialectTag::Postgres).with_query_result(
        "SELECT * FROM users WHERE active = $1 AND name = $2",
        vec![user_row(2, "Bob", "bob@example.com")],
    );
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);
    // override to postgres dialect for this handle via a fresh open under a distinct name
    let config = DatabaseConfig::new(DialectTag::Postgres, "postgres://fake");
    let handle = manager
        .open("pg", driver.connection(), driver.catalog(), config)
        .unwrap();
    let _ = &handle;

    let engine = TemplateEngine::new();
    engine
        .load_bundle(TemplateBundle {
            version: "1".to_string(),
            namespace: "users".to_string(),
            sqls: vec![TemplateSql {
                name: "search".to_string(),
                sql: "SELECT * FROM users WHERE active = :active".to_string(),
                statement_type: TemplateStatementType::Select,
                inparam: Some(vec![InParam {
                    name: "name".to_string(),
                    type_hint: "string".to_string(),
                    sql: "AND name = :name".to_string(),
                }]),
                order: None,
            }],
        })
        .unwrap();

    let mut params = HashMap::new();
    params.insert("active".to_string(), Value::Bool(true));
    params.insert("name".to_string(), Value::Text("Bob".to_string()));
    let rows = engine
        .prepare(handle.as_ref(), "users.search", params)
        .query()
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].str("name"), "Bob");
}

#[tokio::test]
async fn batch_insert_chunks_rows_and_reports_total_affected() {
    let driver = FakeDriver::new(DialectTag::Sqlite);
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);

    let rows = vec![
        user_row(1, "Ada", "ada@example.com"),
        user_row(2, "Bob", "bob@example.com"),
        user_row(3, "Cy", "cy@example.com"),
    ];
    let total = eorm_core::batch_insert(handle.as_ref(), "users", &rows, 2).await.unwrap();

    assert_eq!(total, 2);
    assert_eq!(driver.stats().executed.len(), 2);
}

#[tokio::test]
async fn batch_exec_stops_recording_results_after_first_failure() {
    let driver = FakeDriver::new(DialectTag::Sqlite).with_query_error("BAD SQL", "syntax error");
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);

    let statements = vec![
        ("UPDATE users SET name = ?".to_string(), vec![Value::Text("Ada".to_string())]),
        ("BAD SQL".to_string(), vec![]),
        ("DELETE FROM users WHERE id = ?".to_string(), vec![Value::Int(9)]),
    ];
    let outcome = eorm_core::batch_exec(handle.as_ref(), &statements).await.unwrap();

    assert!(outcome.has_failure);
    let failed: Vec<&BatchExecResult> = outcome.results.iter().filter(|r| r.error.is_some()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].index, 1);
    assert!(outcome.results[2].rows_affected.is_none() && outcome.results[2].error.is_none());
}

#[tokio::test]
async fn use_database_switches_the_default_handle_used_by_callers() {
    let driver_a = FakeDriver::new(DialectTag::Sqlite);
    let driver_b = FakeDriver::new(DialectTag::Sqlite);
    let manager = ConnectionManager::new();
    open_sqlite(&manager, "a", &driver_a);
    open_sqlite(&manager, "b", &driver_b);

    assert_eq!(manager.default_handle().unwrap().name(), "a");
    manager.use_database("b").unwrap();
    assert_eq!(manager.default_handle().unwrap().name(), "b");

    manager.close().await;
    assert!(matches!(manager.default_handle().unwrap_err(), EormError::NoDefaultDatabase));
}

fn _exec_result_is_constructible() -> ExecResult {
    ExecResult {
        rows_affected: 0,
        last_insert_id: None,
    }
}

#[tokio::test]
async fn restore_resets_soft_delete_column_for_matching_rows() {
    let driver = FakeDriver::new(DialectTag::Sqlite).with_exec_result(
        "UPDATE \"users\" SET \"deleted_at\" = ? WHERE id = ?",
        ExecResult { rows_affected: 1, last_insert_id: None },
    );
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);
    handle.configure_soft_delete("users", "deleted_at", SoftDeleteMode::Timestamp);

    let affected = handle
        .table("users")
        .where_("id = ?", vec![Value::Int(2)])
        .restore()
        .await
        .unwrap();

    assert_eq!(affected, 1);
    let executed = driver.stats().executed;
    assert_eq!(executed.last().unwrap().0, "UPDATE \"users\" SET \"deleted_at\" = ? WHERE id = ?");
    assert_eq!(executed.last().unwrap().1, vec![Value::Null, Value::Int(2)]);
}

#[tokio::test]
async fn force_delete_issues_physical_delete_despite_soft_delete_policy() {
    let driver = FakeDriver::new(DialectTag::Sqlite);
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);
    handle.configure_soft_delete("users", "deleted_at", SoftDeleteMode::Timestamp);

    let affected = handle
        .table("users")
        .where_("id = ?", vec![Value::Int(2)])
        .force_delete()
        .await
        .unwrap();

    assert_eq!(affected, 1);
    let executed = driver.stats().executed;
    assert_eq!(executed.last().unwrap().0, "DELETE FROM \"users\" WHERE id = ?");
}

#[tokio::test]
async fn query_without_trashed_injects_predicate_for_configured_tables_only() {
    let driver = FakeDriver::new(DialectTag::Sqlite);
    let manager = ConnectionManager::new();
    let handle = open_sqlite(&manager, "primary", &driver);
    handle.configure_soft_delete("users", "deleted_at", SoftDeleteMode::Timestamp);

    let _ = handle
        .query_without_trashed(
            "SELECT u.*, o.total FROM users u JOIN orders o ON u.id = o.user_id WHERE o.status = ?",
            &[Value::Text("paid".to_string())],
        )
        .await
        .unwrap();

    let executed = driver.stats().executed;
    let (sql, _) = executed.last().unwrap();
    assert!(sql.contains("u.deleted_at IS NULL"));
    assert!(!sql.contains("o.deleted_at"));
}
