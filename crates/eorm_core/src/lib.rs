#![allow(clippy::result_large_err)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod connection_manager;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod pagination;
pub mod policy;
pub mod query_builder;
pub mod query_safety;
pub mod raw_connection;
pub mod record;
pub mod sql_synth;
pub mod template;
pub mod transaction;
pub mod value;

pub use batch::{BatchExecOutcome, BatchExecResult, batch_delete, batch_exec, batch_insert, batch_update};
pub use cache::{
    CacheBackend, CacheStatus, CachedPayload, InProcessCacheBackend, ResultDiscriminator,
    derive_cache_key,
};
pub use config::{DatabaseConfig, EormConfig, EormConfigStore, NamedDatabaseConfig};
pub use connection_manager::{ConnectionManager, DatabaseHandle};
pub use dialect::{Dialect, DialectTag, MsSqlDialect, MySqlDialect, OracleDialect, PlaceholderStyle, PostgresDialect, SqliteDialect};
pub use error::EormError;
pub use executor::{Executor, with_timeout};
pub use metadata::{CatalogQueries, MetadataCache, MetadataSnapshot};
pub use pagination::Page;
pub use policy::{
    OptimisticLockPolicy, SoftDeleteMode, SoftDeletePolicy, SoftDeleteView, TimestampPolicy,
    VersionCheck,
};
pub use query_builder::QueryBuilder;
pub use query_safety::is_safe_read_query;
pub use raw_connection::{ExecResult, RawConnection, RawTransaction};
pub use record::Record;
pub use sql_synth::SqlSynthesizer;
pub use template::{InParam, TemplateBundle, TemplateEngine, TemplateSql};
pub use transaction::{Transaction, run_in_transaction};
pub use value::Value;
