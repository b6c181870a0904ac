use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row};

use eorm_core::{CatalogQueries, DialectTag, EormError, ExecResult, RawConnection, RawTransaction, Record, Value};

/// Same pooling idiom as `eorm_driver_sqlite`: a fixed number of blocking
/// `postgres::Client`s checked out for the duration of one call (or one
/// transaction) and returned on drop.
struct Pool {
    idle: Mutex<VecDeque<Client>>,
    available: Condvar,
}

impl Pool {
    fn checkout(self: &Arc<Self>) -> PooledClient {
        let mut guard = self.idle.lock().unwrap();
        while guard.is_empty() {
            guard = self.available.wait(guard).unwrap();
        }
        let client = guard.pop_front().unwrap();
        PooledClient {
            pool: Arc::clone(self),
            client: Some(client),
        }
    }

    fn checkin(&self, client: Client) {
        self.idle.lock().unwrap().push_back(client);
        self.available.notify_one();
    }
}

struct PooledClient {
    pool: Arc<Pool>,
    client: Option<Client>,
}

impl std::ops::Deref for PooledClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}
impl std::ops::DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().unwrap()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.checkin(client);
        }
    }
}

fn format_postgres_error(err: postgres::Error) -> EormError {
    EormError::driver(err.to_string())
}

/// Postgres params require `&(dyn ToSql + Sync)` references, so each
/// `Value` is boxed first and the call site collects `&**boxed` into the
/// slice `Client::query`/`execute` expect.
fn to_boxed_sql(value: &Value) -> Box<dyn ToSql + Sync> {
    match value {
        Value::Null => Box::new(Option::<i32>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::DateTime(dt) => Box::new(*dt),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
    }
}

fn column_to_value(row: &Row, index: usize, ty: &Type) -> Value {
    macro_rules! try_get {
        ($t:ty, $wrap:expr) => {
            row.try_get::<_, Option<$t>>(index)
                .ok()
                .flatten()
                .map($wrap)
                .unwrap_or(Value::Null)
        };
    }

    match *ty {
        Type::BOOL => try_get!(bool, Value::Bool),
        Type::INT2 => try_get!(i16, |v: i16| Value::Int(v as i64)),
        Type::INT4 => try_get!(i32, |v: i32| Value::Int(v as i64)),
        Type::INT8 => try_get!(i64, Value::Int),
        Type::FLOAT4 => try_get!(f32, |v: f32| Value::Float(v as f64)),
        Type::FLOAT8 => try_get!(f64, Value::Float),
        Type::BYTEA => try_get!(Vec<u8>, Value::Bytes),
        Type::TIMESTAMPTZ => try_get!(DateTime<Utc>, Value::DateTime),
        Type::DATE => try_get!(NaiveDate, Value::Date),
        Type::TIME => try_get!(NaiveTime, Value::Time),
        Type::JSON | Type::JSONB => try_get!(serde_json::Value, |v: serde_json::Value| {
            Value::Json(v.to_string())
        }),
        Type::NUMERIC => try_get!(String, Value::Decimal),
        _ => try_get!(String, Value::Text),
    }
}

fn row_to_record(row: &Row) -> Record {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = column_to_value(row, index, column.type_());
        record.set(column.name().to_string(), value);
    }
    record
}

fn query_sync(client: &mut Client, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
    let boxed: Vec<Box<dyn ToSql + Sync>> = args.iter().map(to_boxed_sql).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();
    let rows = client.query(sql, &refs).map_err(format_postgres_error)?;
    Ok(rows.iter().map(row_to_record).collect())
}

fn execute_sync(client: &mut Client, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
    let boxed: Vec<Box<dyn ToSql + Sync>> = args.iter().map(to_boxed_sql).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();

    // `RETURNING` clauses (emitted by the synthesiser for generated keys)
    // need `query`, not `execute`, to observe the returned row.
    let upper = sql.to_ascii_uppercase();
    if upper.contains("RETURNING") {
        let rows = client.query(sql, &refs).map_err(format_postgres_error)?;
        let last_insert_id = rows.first().and_then(|r| r.try_get::<_, i64>(0).ok());
        return Ok(ExecResult {
            rows_affected: rows.len() as u64,
            last_insert_id,
        });
    }

    let rows_affected = client.execute(sql, &refs).map_err(format_postgres_error)?;
    Ok(ExecResult {
        rows_affected,
        last_insert_id: None,
    })
}

/// `RawConnection` over a small pool of plain-TCP `postgres::Client`s.
pub struct PostgresConnection {
    pool: Arc<Pool>,
}

impl PostgresConnection {
    /// TLS dialling is a deployment concern an example harness would wire
    /// up with `postgres-native-tls`; the core contract this adapter has to
    /// satisfy doesn't depend on it, so plain TCP is the only path here.
    pub fn connect(conninfo: &str, pool_size: usize) -> Result<Self, EormError> {
        let pool_size = pool_size.max(1);
        let mut clients = VecDeque::with_capacity(pool_size);
        for _ in 0..pool_size {
            let client = Client::connect(conninfo, NoTls).map_err(format_postgres_error)?;
            clients.push_back(client);
        }
        Ok(Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(clients),
                available: Condvar::new(),
            }),
        })
    }

    /// Same as `connect`, negotiating TLS via `native-tls` — used when the
    /// DSN's `sslmode` requires it. Kept separate from `connect` since the
    /// two take different `postgres::tls::MakeTlsConnect` implementations.
    pub fn connect_tls(conninfo: &str, pool_size: usize) -> Result<Self, EormError> {
        let pool_size = pool_size.max(1);
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| EormError::driver(format!("tls setup failed: {e}")))?;
        let connector = postgres_native_tls::MakeTlsConnector::new(connector);

        let mut clients = VecDeque::with_capacity(pool_size);
        for _ in 0..pool_size {
            let client = Client::connect(conninfo, connector.clone()).map_err(format_postgres_error)?;
            clients.push_back(client);
        }
        Ok(Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(clients),
                available: Condvar::new(),
            }),
        })
    }
}

#[async_trait]
impl RawConnection for PostgresConnection {
    fn dialect_tag(&self) -> DialectTag {
        DialectTag::Postgres
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.checkout();
            execute_sync(&mut client, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.checkout();
            query_sync(&mut client, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn begin(&self) -> Result<Box<dyn RawTransaction>, EormError> {
        let pool = Arc::clone(&self.pool);
        let client = tokio::task::spawn_blocking(move || -> Result<PooledClient, EormError> {
            let mut client = pool.checkout();
            client.batch_execute("BEGIN").map_err(format_postgres_error)?;
            Ok(client)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))??;

        Ok(Box::new(PostgresTransaction {
            client: Arc::new(Mutex::new(Some(client))),
        }))
    }

    async fn ping(&self) -> Result<(), EormError> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut client = pool.checkout();
            client.batch_execute("SELECT 1").map_err(format_postgres_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }
}

struct PostgresTransaction {
    client: Arc<Mutex<Option<PooledClient>>>,
}

#[async_trait]
impl RawTransaction for PostgresTransaction {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let holder = Arc::clone(&self.client);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let client = guard.as_mut().ok_or(EormError::TransactionClosed)?;
            execute_sync(client, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let holder = Arc::clone(&self.client);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let client = guard.as_mut().ok_or(EormError::TransactionClosed)?;
            query_sync(client, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn commit(self: Box<Self>) -> Result<(), EormError> {
        let holder = self.client;
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let mut client = guard.take().ok_or(EormError::TransactionClosed)?;
            client.batch_execute("COMMIT").map_err(format_postgres_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn rollback(self: Box<Self>) -> Result<(), EormError> {
        let holder = self.client;
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let mut client = guard.take().ok_or(EormError::TransactionClosed)?;
            client.batch_execute("ROLLBACK").map_err(format_postgres_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }
}

/// Catalog queries against `information_schema`/`pg_catalog` — the
/// PostgreSQL-specific half of metadata discovery the core's `MetadataCache`
/// drives through the generic `RawConnection::query`.
pub struct PostgresCatalog;

#[async_trait]
impl CatalogQueries for PostgresCatalog {
    async fn primary_keys(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<String>, EormError> {
        let sql = "
            SELECT a.attname AS name
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = $1::regclass AND i.indisprimary
            ORDER BY array_position(i.indkey, a.attnum)
        ";
        let rows = conn.query(sql, &[Value::Text(table.to_string())]).await?;
        Ok(rows.into_iter().map(|r| r.str("name")).collect())
    }

    async fn columns(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<(String, String)>, EormError> {
        let sql = "
            SELECT column_name AS name, data_type AS type
            FROM information_schema.columns
            WHERE table_name = $1
            ORDER BY ordinal_position
        ";
        let rows = conn.query(sql, &[Value::Text(table.to_string())]).await?;
        Ok(rows.into_iter().map(|r| (r.str("name"), r.str("type"))).collect())
    }
}
