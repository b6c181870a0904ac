use std::time::Duration;

use eorm_core::{CatalogQueries, RawConnection, Value};
use eorm_driver_postgres::{PostgresCatalog, PostgresConnection};
use eorm_test_support::containers;

fn connect(uri: &str) -> Result<PostgresConnection, eorm_core::EormError> {
    containers::retry_db_operation(Duration::from_secs(30), || PostgresConnection::connect(uri, 4))
}

#[test]
#[ignore = "requires Docker daemon"]
fn connect_ping_query_and_execute() {
    containers::with_postgres_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.ping().await?;

            conn.execute("CREATE TABLE users (id SERIAL PRIMARY KEY, name TEXT NOT NULL)", &[])
                .await?;

            let result = conn
                .execute(
                    "INSERT INTO users (name) VALUES ($1)",
                    &[Value::Text("alice".to_string())],
                )
                .await?;
            assert_eq!(result.rows_affected, 1);

            let rows = conn.query("SELECT id, name FROM users", &[]).await?;
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].str("name"), "alice");

            Ok(())
        })
    })
    .unwrap()
}

#[test]
#[ignore = "requires Docker daemon"]
fn transaction_commits_visible_and_rollback_discarded() {
    containers::with_postgres_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.execute(
                "CREATE TABLE accounts (id SERIAL PRIMARY KEY, balance INTEGER NOT NULL)",
                &[],
            )
            .await?;

            let tx = conn.begin().await?;
            tx.execute("INSERT INTO accounts (balance) VALUES ($1)", &[Value::Int(100)])
                .await?;
            tx.commit().await?;

            let rows = conn.query("SELECT balance FROM accounts", &[]).await?;
            assert_eq!(rows.len(), 1);

            let tx = conn.begin().await?;
            tx.execute("INSERT INTO accounts (balance) VALUES ($1)", &[Value::Int(200)])
                .await?;
            tx.rollback().await?;

            let rows = conn.query("SELECT balance FROM accounts", &[]).await?;
            assert_eq!(rows.len(), 1, "rolled back insert should not be visible");

            Ok(())
        })
    })
    .unwrap()
}

#[test]
#[ignore = "requires Docker daemon"]
fn catalog_reports_primary_keys_and_columns() {
    containers::with_postgres_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.execute(
                "CREATE TABLE widgets (id SERIAL PRIMARY KEY, name TEXT NOT NULL, price NUMERIC)",
                &[],
            )
            .await?;

            let catalog = PostgresCatalog;
            let primary_keys = catalog.primary_keys(&conn, "widgets").await?;
            assert_eq!(primary_keys, vec!["id".to_string()]);

            let columns = catalog.columns(&conn, "widgets").await?;
            assert_eq!(columns.len(), 3);
            assert!(columns.iter().any(|(name, _)| name == "name"));

            Ok(())
        })
    })
    .unwrap()
}

#[test]
#[ignore = "requires Docker daemon"]
fn returning_clause_populates_last_insert_id() {
    containers::with_postgres_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.execute("CREATE TABLE tags (id SERIAL PRIMARY KEY, label TEXT NOT NULL)", &[])
                .await?;

            let result = conn
                .execute(
                    "INSERT INTO tags (label) VALUES ($1) RETURNING id",
                    &[Value::Text("urgent".to_string())],
                )
                .await?;
            assert!(result.last_insert_id.is_some());

            Ok(())
        })
    })
    .unwrap()
}
