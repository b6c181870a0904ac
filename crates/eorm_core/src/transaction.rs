use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use crate::cache::CacheBackend;
use crate::dialect::Dialect;
use crate::error::EormError;
use crate::metadata::MetadataCache;
use crate::policy::{OptimisticLockPolicy, SoftDeletePolicy, TimestampPolicy};
use crate::query_builder::QueryBuilder;
use crate::raw_connection::{ExecResult, RawTransaction};
use crate::record::Record;
use crate::value::Value;
use crate::Executor;

/// A scoped handle over one driver transaction. Shares its parent handle's
/// dialect, metadata cache, and policy tables; reads through it never
/// consult the cache (`cache()` always returns `None`) regardless of
/// whether the parent handle has one configured.
pub struct Transaction<'h> {
    raw: Option<Box<dyn RawTransaction>>,
    dialect: &'h dyn Dialect,
    metadata: &'h MetadataCache,
    database_name: String,
    soft_delete: Arc<dyn Fn(&str) -> Option<SoftDeletePolicy> + Send + Sync + 'h>,
    timestamps: Arc<dyn Fn(&str) -> TimestampPolicy + Send + Sync + 'h>,
    optimistic_lock: Arc<dyn Fn(&str) -> Option<OptimisticLockPolicy> + Send + Sync + 'h>,
    query_timeout: Option<Duration>,
    closed: bool,
}

impl<'h> Transaction<'h> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        raw: Box<dyn RawTransaction>,
        dialect: &'h dyn Dialect,
        metadata: &'h MetadataCache,
        database_name: String,
        soft_delete: Arc<dyn Fn(&str) -> Option<SoftDeletePolicy> + Send + Sync + 'h>,
        timestamps: Arc<dyn Fn(&str) -> TimestampPolicy + Send + Sync + 'h>,
        optimistic_lock: Arc<dyn Fn(&str) -> Option<OptimisticLockPolicy> + Send + Sync + 'h>,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            raw: Some(raw),
            dialect,
            metadata,
            database_name,
            soft_delete,
            timestamps,
            optimistic_lock,
            query_timeout,
            closed: false,
        }
    }

    pub fn table(&self, name: impl Into<String>) -> QueryBuilder<'_> {
        QueryBuilder::new(self, name)
    }

    async fn commit(mut self) -> Result<(), EormError> {
        let raw = self.raw.take().ok_or(EormError::TransactionClosed)?;
        self.closed = true;
        raw.commit().await
    }

    async fn rollback(mut self) -> Result<(), EormError> {
        let raw = self.raw.take().ok_or(EormError::TransactionClosed)?;
        self.closed = true;
        raw.rollback().await
    }
}

#[async_trait]
impl<'h> Executor for Transaction<'h> {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect
    }

    async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let raw = self.raw.as_ref().ok_or(EormError::TransactionClosed)?;
        raw.query(sql, args).await
    }

    async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let raw = self.raw.as_ref().ok_or(EormError::TransactionClosed)?;
        raw.execute(sql, args).await
    }

    fn database_name(&self) -> &str {
        &self.database_name
    }

    fn metadata(&self) -> &MetadataCache {
        self.metadata
    }

    fn soft_delete_policy(&self, table: &str) -> Option<SoftDeletePolicy> {
        (self.soft_delete)(table)
    }

    fn timestamp_policy(&self, table: &str) -> TimestampPolicy {
        (self.timestamps)(table)
    }

    fn optimistic_lock_policy(&self, table: &str) -> Option<OptimisticLockPolicy> {
        (self.optimistic_lock)(table)
    }

    fn cache(&self) -> Option<&dyn CacheBackend> {
        None
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }
}

/// Runs `body` inside a transaction. A returned `Err` or a panic inside
/// `body` rolls back; a panic is re-raised after rollback completes so it
/// still terminates the caller's thread/task the way an uncaught panic
/// normally would. Successful return commits.
pub async fn run_in_transaction<'h, T, F>(
    tx: Transaction<'h>,
    body: impl for<'t> FnOnce(&'t Transaction<'h>) -> F,
) -> Result<T, EormError>
where
    F: std::future::Future<Output = Result<T, EormError>>,
{
    let result = AssertUnwindSafe(body(&tx)).catch_unwind().await;

    match result {
        Ok(Ok(value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(Err(e)) => {
            tx.rollback().await?;
            Err(e)
        }
        Err(panic) => {
            // Rollback is best-effort here: if it also fails we still need
            // to propagate the original panic, not mask it with the
            // rollback error.
            let _ = tx.rollback().await;
            std::panic::resume_unwind(panic);
        }
    }
}

#[cfg(test)]
mod tests {
    // `run_in_transaction`'s commit/rollback/panic-safety behaviour needs a
    // `RawTransaction` double to assert which of commit/rollback was
    // actually called; that lives in `eorm_core/tests/connection_manager_integration.rs`
    // against `eorm_test_support::FakeDriver` rather than here.
}
