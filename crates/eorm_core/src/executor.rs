use std::time::Duration;

use async_trait::async_trait;

use crate::cache::CacheBackend;
use crate::dialect::Dialect;
use crate::error::EormError;
use crate::metadata::MetadataCache;
use crate::policy::{inject_soft_delete_predicates, OptimisticLockPolicy, SoftDeletePolicy, TimestampPolicy};
use crate::raw_connection::ExecResult;
use crate::record::Record;
use crate::value::Value;

/// The surface the query builder, pagination engine, and template engine
/// execute against. Implemented by both `DatabaseHandle` and
/// `Transaction` — a transaction is "a handle that never touches the
/// cache", which this trait's default `cache()` makes the natural
/// representation of rather than a parallel set of terminal methods.
#[async_trait]
pub trait Executor: Send + Sync {
    fn dialect(&self) -> &dyn Dialect;

    async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError>;

    async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError>;

    fn database_name(&self) -> &str;

    fn metadata(&self) -> &MetadataCache;

    fn soft_delete_policy(&self, table: &str) -> Option<SoftDeletePolicy>;

    fn timestamp_policy(&self, table: &str) -> TimestampPolicy;

    fn optimistic_lock_policy(&self, table: &str) -> Option<OptimisticLockPolicy>;

    /// `None` inside a transaction — reads never consult the cache there.
    fn cache(&self) -> Option<&dyn CacheBackend>;

    fn default_cache_ttl(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn query_timeout(&self) -> Option<Duration> {
        None
    }

    /// Runs an arbitrary, caller-written SELECT with soft-delete predicates
    /// injected for every `FROM`/`JOIN` table that carries a configured
    /// soft-delete policy (`queryWithOutTrashed`, spec §4.6). Tables with no
    /// policy, or a query the lexical scanner can't confidently decompose,
    /// pass through unmodified.
    async fn query_without_trashed(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let rewritten = inject_soft_delete_predicates(sql, |table| self.soft_delete_policy(table));
        self.raw_query(&rewritten, args).await
    }
}

/// Runs a future against the executor's configured timeout (or unbounded if
/// none is set), translating an elapsed deadline into `EormError::DeadlineExceeded`.
pub async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, EormError>>,
) -> Result<T, EormError> {
    match timeout {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| EormError::DeadlineExceeded)?,
        None => fut.await,
    }
}
