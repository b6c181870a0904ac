use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::watch;

use crate::cache::CacheBackend;
use crate::config::DatabaseConfig;
use crate::dialect::Dialect;
use crate::error::EormError;
use crate::executor::Executor;
use crate::metadata::{CatalogQueries, MetadataCache};
use crate::policy::{OptimisticLockPolicy, SoftDeleteMode, SoftDeletePolicy, TimestampPolicy};
use crate::query_builder::QueryBuilder;
use crate::raw_connection::{ExecResult, RawConnection};
use crate::record::Record;
use crate::sql_synth::SqlSynthesizer;
use crate::transaction::{run_in_transaction, Transaction};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthState {
    Healthy,
    Unhealthy,
}

/// A single open database: a `RawConnection` plus the cross-cutting policy
/// tables, metadata cache, and optional result cache configured for it.
/// Implements `Executor` so `.table()` and template invocations run against
/// it exactly as they do against a `Transaction`.
pub struct DatabaseHandle {
    name: String,
    dialect: &'static dyn Dialect,
    raw: Box<dyn RawConnection>,
    catalog: Box<dyn CatalogQueries>,
    metadata: MetadataCache,
    cache: Option<Arc<dyn CacheBackend>>,
    default_cache_ttl: Duration,
    query_timeout: Option<Duration>,
    timestamps: RwLock<HashMap<String, TimestampPolicy>>,
    soft_delete: RwLock<HashMap<String, SoftDeletePolicy>>,
    optimistic_lock: RwLock<HashMap<String, OptimisticLockPolicy>>,
    shutdown: watch::Sender<bool>,
}

impl DatabaseHandle {
    fn new(
        name: String,
        raw: Box<dyn RawConnection>,
        catalog: Box<dyn CatalogQueries>,
        cache: Option<Arc<dyn CacheBackend>>,
        config: &DatabaseConfig,
    ) -> Arc<Self> {
        let dialect = config.dialect.dialect();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = Arc::new(Self {
            name,
            dialect,
            raw,
            catalog,
            metadata: MetadataCache::new(),
            cache,
            default_cache_ttl: Duration::from_secs(60),
            query_timeout: config.query_timeout,
            timestamps: RwLock::new(HashMap::new()),
            soft_delete: RwLock::new(HashMap::new()),
            optimistic_lock: RwLock::new(HashMap::new()),
            shutdown: shutdown_tx,
        });

        spawn_health_monitor(
            Arc::clone(&handle),
            config.monitor_interval_healthy,
            config.monitor_interval_unhealthy,
            shutdown_rx,
        );

        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configures an auto-stamped `created_at`/`updated_at` pair for `table`.
    /// A `None` field disables that half independently.
    pub fn configure_timestamps(&self, table: impl Into<String>, policy: TimestampPolicy) {
        self.timestamps.write().unwrap().insert(table.into(), policy);
    }

    pub fn configure_soft_delete(&self, table: impl Into<String>, field: impl Into<String>, mode: SoftDeleteMode) {
        self.soft_delete.write().unwrap().insert(
            table.into(),
            SoftDeletePolicy {
                field: field.into(),
                mode,
            },
        );
    }

    pub fn configure_optimistic_lock(&self, table: impl Into<String>, version_field: impl Into<String>) {
        self.optimistic_lock.write().unwrap().insert(
            table.into(),
            OptimisticLockPolicy {
                version_field: version_field.into(),
            },
        );
    }

    pub fn table(&self, name: impl Into<String>) -> QueryBuilder<'_> {
        QueryBuilder::new(self, name)
    }

    /// Inserts `record` into `table`. Unlike `find`/`update`/`delete`, insert
    /// is not a `QueryBuilder` terminal: the generated-id writeback only
    /// makes sense against a caller-owned, mutable record, which the
    /// builder's consuming terminal style does not offer.
    ///
    /// `cache_repository` names the repository (if any) a write through this
    /// insert should invalidate — the same repository name a reader passed
    /// to `.cache(repository, ttl)`, not the table name. A table has no
    /// fixed relationship to a repository name, so `None` here leaves any
    /// cached reads for this table untouched; pass the repository explicitly
    /// when one covers it.
    pub async fn insert(
        &self,
        table: &str,
        record: &mut Record,
        cache_repository: Option<&str>,
    ) -> Result<ExecResult, EormError> {
        let snapshot = self
            .metadata
            .get_or_load(self.raw.as_ref(), self.catalog.as_ref(), table)
            .await?;
        let synth = SqlSynthesizer::new(self.dialect);
        let plan = synth.insert(table, record, &snapshot.primary_keys)?;

        let result = self.raw.execute(&plan.sql, &plan.args).await?;

        if let Some(key) = &plan.omitted_key {
            if let Some(id) = result.last_insert_id {
                record.set(key.clone(), Value::Int(id));
            }
        }

        if let (Some(cache), Some(repository)) = (&self.cache, cache_repository) {
            let _ = cache.clear_repository(repository).await;
        }

        Ok(result)
    }

    /// Starts a transaction on this handle's underlying connection and runs
    /// `body` against the scoped `Transaction` handle via
    /// `run_in_transaction`.
    pub async fn transaction<'h, T, F>(
        &'h self,
        body: impl for<'t> FnOnce(&'t Transaction<'h>) -> F,
    ) -> Result<T, EormError>
    where
        F: std::future::Future<Output = Result<T, EormError>>,
    {
        let raw_tx = self.raw.begin().await?;
        let timestamps = self.timestamps.read().unwrap().clone();
        let soft_delete = self.soft_delete.read().unwrap().clone();
        let optimistic_lock = self.optimistic_lock.read().unwrap().clone();

        let tx = Transaction::new(
            raw_tx,
            self.dialect,
            &self.metadata,
            self.name.clone(),
            Arc::new(move |table: &str| soft_delete.get(table).cloned()),
            Arc::new(move |table: &str| timestamps.get(table).cloned().unwrap_or_default()),
            Arc::new(move |table: &str| optimistic_lock.get(table).cloned()),
            self.query_timeout,
        );

        run_in_transaction(tx, body).await
    }

    async fn shutdown_monitor(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[async_trait]
impl Executor for DatabaseHandle {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect
    }

    async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        self.raw.query(sql, args).await
    }

    async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        self.raw.execute(sql, args).await
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    fn soft_delete_policy(&self, table: &str) -> Option<SoftDeletePolicy> {
        self.soft_delete.read().unwrap().get(table).cloned()
    }

    fn timestamp_policy(&self, table: &str) -> TimestampPolicy {
        self.timestamps.read().unwrap().get(table).cloned().unwrap_or_default()
    }

    fn optimistic_lock_policy(&self, table: &str) -> Option<OptimisticLockPolicy> {
        self.optimistic_lock.read().unwrap().get(table).cloned()
    }

    fn cache(&self) -> Option<&dyn CacheBackend> {
        self.cache.as_deref()
    }

    fn default_cache_ttl(&self) -> Duration {
        self.default_cache_ttl
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }
}

/// Background ping loop: polls at `healthy_interval` while pings succeed,
/// drops to `unhealthy_interval` after the first failure, and only logs when
/// the observed state actually changes from the previous tick.
fn spawn_health_monitor(
    handle: Arc<DatabaseHandle>,
    healthy_interval: Duration,
    unhealthy_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut last_state: Option<HealthState> = None;

        loop {
            let interval = match last_state {
                Some(HealthState::Unhealthy) => unhealthy_interval,
                _ => healthy_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let state = match handle.raw.ping().await {
                Ok(()) => HealthState::Healthy,
                Err(_) => HealthState::Unhealthy,
            };

            if last_state != Some(state) {
                match state {
                    HealthState::Healthy => info!("database '{}' is healthy", handle.name),
                    HealthState::Unhealthy => warn!("database '{}' failed a health check", handle.name),
                }
                last_state = Some(state);
            }
        }
    });
}

/// Process-wide registry of open database handles, keyed by name, plus a
/// pointer to the handle used as the default (initially the first one
/// opened, movable with `use_database`).
#[derive(Default)]
pub struct ConnectionManager {
    handles: RwLock<HashMap<String, Arc<DatabaseHandle>>>,
    default_name: RwLock<Option<String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new handle from an already-constructed driver connection.
    /// Dialling a DSN into a concrete `RawConnection` is a reference driver
    /// crate's job (`eorm_driver_sqlite`/`_postgres`/`_mysql`), not
    /// `eorm_core`'s — this crate has no compile-time dependency on any of
    /// them, so `open` takes the connection and its catalog-query
    /// implementation rather than a raw DSN string.
    pub fn open(
        &self,
        name: impl Into<String>,
        raw: Box<dyn RawConnection>,
        catalog: Box<dyn CatalogQueries>,
        config: DatabaseConfig,
    ) -> Result<Arc<DatabaseHandle>, EormError> {
        self.open_with_cache(name, raw, catalog, config, None)
    }

    pub fn open_with_cache(
        &self,
        name: impl Into<String>,
        raw: Box<dyn RawConnection>,
        catalog: Box<dyn CatalogQueries>,
        config: DatabaseConfig,
        cache: Option<Arc<dyn CacheBackend>>,
    ) -> Result<Arc<DatabaseHandle>, EormError> {
        let name = name.into();
        let handle = DatabaseHandle::new(name.clone(), raw, catalog, cache, &config);

        {
            let mut handles = self.handles.write().unwrap();
            handles.insert(name.clone(), Arc::clone(&handle));
        }
        {
            let mut default_name = self.default_name.write().unwrap();
            if default_name.is_none() {
                *default_name = Some(name);
            }
        }

        Ok(handle)
    }

    /// Switches the default handle to the one already open under `name`.
    pub fn use_database(&self, name: &str) -> Result<(), EormError> {
        if !self.handles.read().unwrap().contains_key(name) {
            return Err(EormError::unknown_database(name));
        }
        *self.default_name.write().unwrap() = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<DatabaseHandle>, EormError> {
        self.handles
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EormError::unknown_database(name))
    }

    /// Returns the default handle: the one `use_database`d most recently, or
    /// the first ever opened if `use_database` has never been called.
    pub fn default_handle(&self) -> Result<Arc<DatabaseHandle>, EormError> {
        let name = self
            .default_name
            .read()
            .unwrap()
            .clone()
            .ok_or(EormError::NoDefaultDatabase)?;
        self.get(&name)
    }

    /// Closes every open handle: tears down each one's health monitor and
    /// clears the registry. The monitor task stops on its next loop tick
    /// rather than immediately, but will never fire a driver call again
    /// once the signal is observed.
    pub async fn close(&self) {
        let handles: Vec<Arc<DatabaseHandle>> = {
            let mut guard = self.handles.write().unwrap();
            let all = guard.values().cloned().collect();
            guard.clear();
            all
        };
        *self.default_name.write().unwrap() = None;

        for handle in handles {
            handle.shutdown_monitor().await;
        }
    }

    pub async fn ping(&self, name: &str) -> Result<(), EormError> {
        self.get(name)?.raw.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectTag;
    use crate::raw_connection::RawTransaction;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct TestConnection {
        next_insert_id: AtomicI64,
    }

    #[async_trait]
    impl RawConnection for TestConnection {
        fn dialect_tag(&self) -> DialectTag {
            DialectTag::Sqlite
        }

        async fn execute(&self, _sql: &str, _args: &[Value]) -> Result<ExecResult, EormError> {
            Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: Some(self.next_insert_id.load(Ordering::SeqCst)),
            })
        }

        async fn query(&self, _sql: &str, _args: &[Value]) -> Result<Vec<Record>, EormError> {
            Ok(Vec::new())
        }

        async fn begin(&self) -> Result<Box<dyn RawTransaction>, EormError> {
            Err(EormError::NotSupported("transactions not exercised in this double".into()))
        }

        async fn ping(&self) -> Result<(), EormError> {
            Ok(())
        }
    }

    struct TestCatalog;

    #[async_trait]
    impl CatalogQueries for TestCatalog {
        async fn primary_keys(&self, _conn: &dyn RawConnection, _table: &str) -> Result<Vec<String>, EormError> {
            Ok(vec!["id".to_string()])
        }

        async fn columns(&self, _conn: &dyn RawConnection, _table: &str) -> Result<Vec<(String, String)>, EormError> {
            Ok(vec![("id".to_string(), "INTEGER".to_string())])
        }
    }

    fn config() -> DatabaseConfig {
        DatabaseConfig::new(DialectTag::Sqlite, "memory")
    }

    fn driver(next_insert_id: i64) -> (Box<dyn RawConnection>, Box<dyn CatalogQueries>) {
        (
            Box::new(TestConnection {
                next_insert_id: AtomicI64::new(next_insert_id),
            }),
            Box::new(TestCatalog),
        )
    }

    #[tokio::test]
    async fn open_registers_the_first_handle_as_default() {
        let manager = ConnectionManager::new();
        let (raw, catalog) = driver(1);
        manager.open("primary", raw, catalog, config()).unwrap();

        let default = manager.default_handle().unwrap();
        assert_eq!(default.name(), "primary");
    }

    #[tokio::test]
    async fn use_database_switches_default_and_rejects_unknown_name() {
        let manager = ConnectionManager::new();
        let (raw_a, cat_a) = driver(1);
        let (raw_b, cat_b) = driver(2);
        manager.open("a", raw_a, cat_a, config()).unwrap();
        manager.open("b", raw_b, cat_b, config()).unwrap();

        manager.use_database("b").unwrap();
        assert_eq!(manager.default_handle().unwrap().name(), "b");

        assert!(manager.use_database("missing").is_err());
    }

    #[tokio::test]
    async fn default_handle_errors_when_nothing_is_open() {
        let manager = ConnectionManager::new();
        assert!(matches!(manager.default_handle().unwrap_err(), EormError::NoDefaultDatabase));
    }

    #[tokio::test]
    async fn insert_writes_generated_id_back_into_record() {
        let manager = ConnectionManager::new();
        let (raw, catalog) = driver(42);
        let handle = manager.open("primary", raw, catalog, config()).unwrap();

        let mut record = Record::new();
        record.set("name", Value::Text("Bob".to_string()));
        handle.insert("users", &mut record, None).await.unwrap();

        assert_eq!(record.get("id"), Some(&Value::Int(42)));
    }

    #[tokio::test]
    async fn close_clears_the_registry() {
        let manager = ConnectionManager::new();
        let (raw, catalog) = driver(1);
        manager.open("primary", raw, catalog, config()).unwrap();
        manager.close().await;

        assert!(matches!(manager.default_handle().unwrap_err(), EormError::NoDefaultDatabase));
        assert!(manager.get("primary").is_err());
    }
}
