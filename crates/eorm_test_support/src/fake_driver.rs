use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use eorm_core::{CatalogQueries, DialectTag, EormError, ExecResult, RawConnection, RawTransaction, Record, Value};

/// What a configured SQL string resolves to the next time it's seen. Queries
/// not configured fall back to the driver's default rows/exec result rather
/// than erroring, so tests only need to stub the statements they actually
/// care about.
#[derive(Debug, Clone)]
enum FakeOutcome {
    Rows(Vec<Record>),
    Exec(ExecResult),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriverStats {
    pub executed: Vec<(String, Vec<Value>)>,
    pub commit_calls: usize,
    pub rollback_calls: usize,
    pub ping_calls: usize,
}

#[derive(Default)]
struct FakeDriverState {
    query_outcomes: RwLock<HashMap<String, FakeOutcome>>,
    default_rows: RwLock<Vec<Record>>,
    next_insert_id: AtomicI64,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
    commit_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    ping_error: RwLock<Option<String>>,
    primary_keys: RwLock<Vec<String>>,
    columns: RwLock<Vec<(String, String)>>,
}

/// A deterministic, in-memory `RawConnection`/`CatalogQueries` pair for
/// testing against `QueryBuilder`, the template engine, and the batch
/// executor without a real socket. Shares one `Arc<FakeDriverState>` across
/// every connection/transaction/catalog handed out, so stats recorded
/// through one reflect calls made through any of them.
#[derive(Clone)]
pub struct FakeDriver {
    dialect: DialectTag,
    state: Arc<FakeDriverState>,
}

impl FakeDriver {
    pub fn new(dialect: DialectTag) -> Self {
        Self {
            dialect,
            state: Arc::new(FakeDriverState::default()),
        }
    }

    pub fn with_query_result(self, sql: impl Into<String>, rows: Vec<Record>) -> Self {
        self.state.query_outcomes.write().unwrap().insert(sql.into(), FakeOutcome::Rows(rows));
        self
    }

    pub fn with_query_error(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.state
            .query_outcomes
            .write()
            .unwrap()
            .insert(sql.into(), FakeOutcome::Error(message.into()));
        self
    }

    pub fn with_exec_result(self, sql: impl Into<String>, result: ExecResult) -> Self {
        self.state.query_outcomes.write().unwrap().insert(sql.into(), FakeOutcome::Exec(result));
        self
    }

    pub fn with_default_rows(self, rows: Vec<Record>) -> Self {
        *self.state.default_rows.write().unwrap() = rows;
        self
    }

    pub fn with_ping_error(self, message: impl Into<String>) -> Self {
        *self.state.ping_error.write().unwrap() = Some(message.into());
        self
    }

    pub fn with_primary_keys(self, keys: Vec<String>) -> Self {
        *self.state.primary_keys.write().unwrap() = keys;
        self
    }

    pub fn with_columns(self, columns: Vec<(String, String)>) -> Self {
        *self.state.columns.write().unwrap() = columns;
        self
    }

    pub fn set_next_insert_id(&self, id: i64) {
        self.state.next_insert_id.store(id, Ordering::SeqCst);
    }

    pub fn stats(&self) -> FakeDriverStats {
        FakeDriverStats {
            executed: self.state.executed.lock().unwrap().clone(),
            commit_calls: self.state.commit_calls.load(Ordering::SeqCst),
            rollback_calls: self.state.rollback_calls.load(Ordering::SeqCst),
            ping_calls: self.state.ping_calls.load(Ordering::SeqCst),
        }
    }

    pub fn connection(&self) -> Box<dyn RawConnection> {
        Box::new(FakeConnection {
            dialect: self.dialect,
            state: Arc::clone(&self.state),
        })
    }

    pub fn catalog(&self) -> Box<dyn CatalogQueries> {
        Box::new(FakeCatalog {
            state: Arc::clone(&self.state),
        })
    }
}

struct FakeConnection {
    dialect: DialectTag,
    state: Arc<FakeDriverState>,
}

impl FakeConnection {
    fn record_call(&self, sql: &str, args: &[Value]) {
        self.state.executed.lock().unwrap().push((sql.to_string(), args.to_vec()));
    }

    fn resolve(&self, sql: &str) -> Option<FakeOutcome> {
        self.state.query_outcomes.read().unwrap().get(sql).cloned()
    }
}

#[async_trait]
impl RawConnection for FakeConnection {
    fn dialect_tag(&self) -> DialectTag {
        self.dialect
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        self.record_call(sql, args);
        match self.resolve(sql) {
            Some(FakeOutcome::Exec(result)) => Ok(result),
            Some(FakeOutcome::Error(message)) => Err(EormError::driver(message)),
            Some(FakeOutcome::Rows(_)) | None => Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: Some(self.state.next_insert_id.load(Ordering::SeqCst)),
            }),
        }
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        self.record_call(sql, args);
        match self.resolve(sql) {
            Some(FakeOutcome::Rows(rows)) => Ok(rows),
            Some(FakeOutcome::Error(message)) => Err(EormError::driver(message)),
            Some(FakeOutcome::Exec(_)) | None => Ok(self.state.default_rows.read().unwrap().clone()),
        }
    }

    async fn begin(&self) -> Result<Box<dyn RawTransaction>, EormError> {
        Ok(Box::new(FakeTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn ping(&self) -> Result<(), EormError> {
        self.state.ping_calls.fetch_add(1, Ordering::SeqCst);
        match self.state.ping_error.read().unwrap().clone() {
            Some(message) => Err(EormError::driver(message)),
            None => Ok(()),
        }
    }
}

struct FakeTransaction {
    state: Arc<FakeDriverState>,
}

#[async_trait]
impl RawTransaction for FakeTransaction {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        self.state.executed.lock().unwrap().push((sql.to_string(), args.to_vec()));
        match self.state.query_outcomes.read().unwrap().get(sql).cloned() {
            Some(FakeOutcome::Exec(result)) => Ok(result),
            Some(FakeOutcome::Error(message)) => Err(EormError::driver(message)),
            _ => Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            }),
        }
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        self.state.executed.lock().unwrap().push((sql.to_string(), args.to_vec()));
        match self.state.query_outcomes.read().unwrap().get(sql).cloned() {
            Some(FakeOutcome::Rows(rows)) => Ok(rows),
            Some(FakeOutcome::Error(message)) => Err(EormError::driver(message)),
            _ => Ok(self.state.default_rows.read().unwrap().clone()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), EormError> {
        self.state.commit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), EormError> {
        self.state.rollback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A `CatalogQueries` double that hands back whatever `FakeDriver::with_primary_keys`/
/// `with_columns` configured, defaulting to a single `id` primary key and no
/// declared columns.
struct FakeCatalog {
    state: Arc<FakeDriverState>,
}

#[async_trait]
impl CatalogQueries for FakeCatalog {
    async fn primary_keys(&self, _conn: &dyn RawConnection, _table: &str) -> Result<Vec<String>, EormError> {
        let configured = self.state.primary_keys.read().unwrap().clone();
        Ok(if configured.is_empty() {
            vec!["id".to_string()]
        } else {
            configured
        })
    }

    async fn columns(&self, _conn: &dyn RawConnection, _table: &str) -> Result<Vec<(String, String)>, EormError> {
        Ok(self.state.columns.read().unwrap().clone())
    }
}
