use std::time::Duration;

use eorm_core::{CatalogQueries, RawConnection, Value};
use eorm_driver_mysql::{MySqlCatalog, MySqlConnection};
use eorm_test_support::containers;

fn connect(uri: &str) -> Result<MySqlConnection, eorm_core::EormError> {
    containers::retry_db_operation(Duration::from_secs(30), || MySqlConnection::connect(uri))
}

#[test]
#[ignore = "requires Docker daemon"]
fn connect_ping_query_and_execute() {
    containers::with_mysql_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.ping().await?;

            conn.execute(
                "CREATE TABLE users (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64) NOT NULL)",
                &[],
            )
            .await?;

            let result = conn
                .execute("INSERT INTO users (name) VALUES (?)", &[Value::Text("alice".to_string())])
                .await?;
            assert_eq!(result.rows_affected, 1);
            assert!(result.last_insert_id.is_some());

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
    containers::with_mysql_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.execute(
                "CREATE TABLE accounts (id INT AUTO_INCREMENT PRIMARY KEY, balance INT NOT NULL)",
                &[],
            )
            .await?;

            let tx = conn.begin().await?;
            tx.execute("INSERT INTO accounts (balance) VALUES (?)", &[Value::Int(100)])
                .await?;
            tx.commit().await?;

            let rows = conn.query("SELECT balance FROM accounts", &[]).await?;
            assert_eq!(rows.len(), 1);

            let tx = conn.begin().await?;
            tx.execute("INSERT INTO accounts (balance) VALUES (?)", &[Value::Int(200)])
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
    containers::with_mysql_url(|uri| {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let conn = connect(&uri)?;
            conn.execute(
                "CREATE TABLE widgets (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64) NOT NULL, price DECIMAL(10,2))",
                &[],
            )
            .await?;

            let catalog = MySqlCatalog;
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
