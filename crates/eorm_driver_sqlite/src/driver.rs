use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use async_trait::async_trait;
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection as RusqliteConn};

use eorm_core::{CatalogQueries, DialectTag, EormError, ExecResult, RawConnection, RawTransaction, Record, Value};

/// A fixed-size pool of blocking `rusqlite` connections. Checking one out
/// blocks the calling (blocking-pool) thread until one is returned; every
/// `RawConnection`/`RawTransaction` call runs inside `spawn_blocking`, so
/// that wait never stalls the async runtime itself.
struct Pool {
    idle: Mutex<VecDeque<RusqliteConn>>,
    available: Condvar,
}

impl Pool {
    fn checkout(self: &Arc<Self>) -> PooledConn {
        let mut guard = self.idle.lock().unwrap();
        while guard.is_empty() {
            guard = self.available.wait(guard).unwrap();
        }
        let conn = guard.pop_front().unwrap();
        PooledConn {
            pool: Arc::clone(self),
            conn: Some(conn),
        }
    }

    fn checkin(&self, conn: RusqliteConn) {
        self.idle.lock().unwrap().push_back(conn);
        self.available.notify_one();
    }
}

struct PooledConn {
    pool: Arc<Pool>,
    conn: Option<RusqliteConn>,
}

impl std::ops::Deref for PooledConn {
    type Target = RusqliteConn;
    fn deref(&self) -> &RusqliteConn {
        self.conn.as_ref().unwrap()
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

fn format_sqlite_error(err: rusqlite::Error) -> EormError {
    EormError::driver(err.to_string())
}

fn to_sqlite_value(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(*b as i64),
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::DateTime(dt) => SqliteValue::Text(dt.to_rfc3339()),
        Value::Date(d) => SqliteValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => SqliteValue::Text(t.format("%H:%M:%S%.f").to_string()),
    }
}

fn from_sqlite_value(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Int(i),
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Bytes(b),
    }
}

fn query_sync(conn: &RusqliteConn, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
    let mut stmt = conn.prepare(sql).map_err(format_sqlite_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let params: Vec<SqliteValue> = args.iter().map(to_sqlite_value).collect();
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(format_sqlite_error)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(format_sqlite_error)? {
        let mut record = Record::new();
        for (index, name) in columns.iter().enumerate() {
            let value: SqliteValue = row.get(index).map_err(format_sqlite_error)?;
            record.set(name.clone(), from_sqlite_value(value));
        }
        out.push(record);
    }
    Ok(out)
}

fn execute_sync(conn: &RusqliteConn, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
    let params: Vec<SqliteValue> = args.iter().map(to_sqlite_value).collect();
    let rows_affected = conn
        .execute(sql, params_from_iter(params.iter()))
        .map_err(format_sqlite_error)?;
    Ok(ExecResult {
        rows_affected: rows_affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// `RawConnection` over a small pool of file (or `:memory:`) connections.
/// SQLite serialises writers at the file level anyway, so pooling mainly
/// buys concurrent readers; `pool_size` below 2 still works, just
/// serialised.
pub struct SqliteConnection {
    pool: Arc<Pool>,
}

impl SqliteConnection {
    pub fn open(path: &str, pool_size: usize) -> Result<Self, EormError> {
        let pool_size = pool_size.max(1);
        let mut conns = VecDeque::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = if path == ":memory:" {
                // Every `:memory:` open is its own private database, so a
                // pool of more than one connection would each see an empty
                // schema. Single-connection pools are the only sane choice
                // for in-memory use; callers asking for more get one.
                RusqliteConn::open_in_memory().map_err(format_sqlite_error)?
            } else {
                RusqliteConn::open(path).map_err(format_sqlite_error)?
            };
            conn.execute_batch("PRAGMA foreign_keys = ON;")
                .map_err(format_sqlite_error)?;
            conns.push_back(conn);
            if path == ":memory:" {
                break;
            }
        }

        Ok(Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(conns),
                available: Condvar::new(),
            }),
        })
    }
}

#[async_trait]
impl RawConnection for SqliteConnection {
    fn dialect_tag(&self) -> DialectTag {
        DialectTag::Sqlite
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.checkout();
            execute_sync(&conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.checkout();
            query_sync(&conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn begin(&self) -> Result<Box<dyn RawTransaction>, EormError> {
        let pool = Arc::clone(&self.pool);
        let conn = tokio::task::spawn_blocking(move || -> Result<PooledConn, EormError> {
            let conn = pool.checkout();
            conn.execute_batch("BEGIN DEFERRED").map_err(format_sqlite_error)?;
            Ok(conn)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))??;

        Ok(Box::new(SqliteTransaction { conn: Arc::new(Mutex::new(Some(conn))) }))
    }

    async fn ping(&self) -> Result<(), EormError> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let conn = pool.checkout();
            conn.execute_batch("SELECT 1").map_err(format_sqlite_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }
}

/// Holds the checked-out connection for the lifetime of the transaction;
/// dropping without `commit`/`rollback` leaves the lock poisoned by design —
/// `run_in_transaction` (eorm_core) never allows that path.
struct SqliteTransaction {
    conn: Arc<Mutex<Option<PooledConn>>>,
}

impl SqliteTransaction {
    fn with_conn<T>(&self, f: impl FnOnce(&RusqliteConn) -> Result<T, EormError>) -> Result<T, EormError> {
        let guard = self.conn.lock().unwrap();
        let conn = guard
            .as_ref()
            .ok_or(EormError::TransactionClosed)?;
        f(conn)
    }
}

#[async_trait]
impl RawTransaction for SqliteTransaction {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let holder = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = holder.lock().unwrap();
            let conn = guard.as_ref().ok_or(EormError::TransactionClosed)?;
            execute_sync(conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let holder = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = holder.lock().unwrap();
            let conn = guard.as_ref().ok_or(EormError::TransactionClosed)?;
            query_sync(conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn commit(self: Box<Self>) -> Result<(), EormError> {
        let holder = self.conn;
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let conn = guard.take().ok_or(EormError::TransactionClosed)?;
            conn.execute_batch("COMMIT").map_err(format_sqlite_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn rollback(self: Box<Self>) -> Result<(), EormError> {
        let holder = self.conn;
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let conn = guard.take().ok_or(EormError::TransactionClosed)?;
            conn.execute_batch("ROLLBACK").map_err(format_sqlite_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }
}

/// Catalog queries expressed through `PRAGMA table_info`, routed back
/// through the generic `RawConnection::query` rather than touching
/// `rusqlite` directly — any `RawConnection` that happens to be SQLite
/// speaks this dialect of pragma.
pub struct SqliteCatalog;

#[async_trait]
impl CatalogQueries for SqliteCatalog {
    async fn primary_keys(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<String>, EormError> {
        let sql = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
        let rows = conn.query(&sql, &[]).await?;
        let mut pks: Vec<(i64, String)> = rows
            .into_iter()
            .filter(|r| r.int("pk") > 0)
            .map(|r| (r.int("pk"), r.str("name")))
            .collect();
        pks.sort_by_key(|(order, _)| *order);
        Ok(pks.into_iter().map(|(_, name)| name).collect())
    }

    async fn columns(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<(String, String)>, EormError> {
        let sql = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
        let rows = conn.query(&sql, &[]).await?;
        Ok(rows.into_iter().map(|r| (r.str("name"), r.str("type"))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteConnection {
        let conn = SqliteConnection::open(":memory:", 1).unwrap();
        conn
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_and_query_round_trip() {
        let conn = setup();
        conn.execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            &[],
        )
        .await
        .unwrap();

        let result = conn
            .execute(
                "INSERT INTO users (name) VALUES (?)",
                &[Value::Text("Ada".into())],
            )
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));

        let rows = conn.query("SELECT id, name FROM users", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str("name"), "Ada");
        assert_eq!(rows[0].int("id"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transaction_commits_visible_rollback_discarded() {
        let conn = setup();
        conn.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();

        let tx = conn.begin().await.unwrap();
        tx.execute("INSERT INTO t (v) VALUES (1)", &[]).await.unwrap();
        tx.commit().await.unwrap();

        let tx2 = conn.begin().await.unwrap();
        tx2.execute("INSERT INTO t (v) VALUES (2)", &[]).await.unwrap();
        tx2.rollback().await.unwrap();

        let rows = conn.query("SELECT v FROM t ORDER BY v", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int("v"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn catalog_reports_primary_key_and_columns() {
        let conn = setup();
        conn.execute(
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT, qty INTEGER)",
            &[],
        )
        .await
        .unwrap();

        let catalog = SqliteCatalog;
        let pks = catalog.primary_keys(&conn, "widgets").await.unwrap();
        assert_eq!(pks, vec!["id".to_string()]);

        let columns = catalog.columns(&conn, "widgets").await.unwrap();
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "qty"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_succeeds_on_open_connection() {
        let conn = setup();
        conn.ping().await.unwrap();
    }
}
