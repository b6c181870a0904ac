use async_trait::async_trait;

use crate::dialect::DialectTag;
use crate::error::EormError;
use crate::record::Record;
use crate::value::Value;

/// Outcome of an `exec`-class statement (INSERT/UPDATE/DELETE).
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// The stateful half of driver support: an actual socket or file handle
/// capable of running statements. Concrete SQL driver registrations are an
/// external collaborator; `eorm_core` only depends on this trait, and the
/// reference adapter crates (`eorm_driver_sqlite`, `_postgres`, `_mysql`)
/// are the only things that know about `rusqlite`/`postgres`/`mysql`.
#[async_trait]
pub trait RawConnection: Send + Sync {
    fn dialect_tag(&self) -> DialectTag;

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError>;

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError>;

    async fn begin(&self) -> Result<Box<dyn RawTransaction>, EormError>;

    async fn ping(&self) -> Result<(), EormError>;
}

/// A driver transaction in progress. Dropping without calling `commit` or
/// `rollback` is a caller bug the transaction coordinator (`transaction.rs`)
/// never allows — every code path through it calls one or the other.
#[async_trait]
pub trait RawTransaction: Send + Sync {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError>;

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError>;

    async fn commit(self: Box<Self>) -> Result<(), EormError>;

    async fn rollback(self: Box<Self>) -> Result<(), EormError>;
}
