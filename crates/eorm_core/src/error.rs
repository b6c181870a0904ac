use thiserror::Error;

/// Errors surfaced by the execution engine.
///
/// Policy and validation failures get their own variants so callers can
/// distinguish misuse from a driver fault; `Driver` is the catch-all for
/// whatever the underlying connection reports.
#[derive(Debug, Error)]
pub enum EormError {
    /// A table or column identifier failed the safe-identifier check.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A fragment passed to an ORDER BY/GROUP BY/JOIN position used a
    /// token outside the allow-list.
    #[error("unsafe sql fragment: {0}")]
    UnsafeSqlFragment(String),

    /// A template's placeholder count did not match its argument count.
    #[error("parameter count mismatch: expected {expected}, got {actual}")]
    ParamCountMismatch { expected: usize, actual: usize },

    /// An UPDATE guarded by an optimistic-lock version predicate affected
    /// zero rows.
    #[error("version mismatch: row was modified concurrently")]
    VersionMismatch,

    /// No handle has been opened yet and none was named explicitly.
    #[error("no default database is open")]
    NoDefaultDatabase,

    /// A named handle was requested but never opened.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// `findFirst`/`queryFirst` found nothing.
    #[error("no record found")]
    NoRecordFound,

    /// An operation was attempted on a transaction handle that has already
    /// committed, rolled back, or that does not support nesting.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The configured or request-level timeout elapsed before the driver
    /// call returned.
    #[error("operation exceeded its deadline")]
    DeadlineExceeded,

    /// A `delete()` was attempted with no WHERE clause; refused by default.
    #[error("refusing to delete/update without a where clause")]
    UnboundedMutationRefused,

    /// A named template bundle, or a name within it, was not found.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// An operation the driver does not implement (e.g. cancellation on a
    /// dialect without one).
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Cache backend failure (connection, (de)serialisation).
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem or network I/O error loading configuration/templates.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation failure for configuration/templates/cache
    /// payloads.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Opaque error surfaced by an underlying `RawConnection` implementation.
    #[error("driver error: {0}")]
    Driver(String),
}

impl EormError {
    pub fn invalid_identifier(name: impl Into<String>) -> Self {
        Self::InvalidIdentifier(name.into())
    }

    pub fn unsafe_fragment(fragment: impl Into<String>) -> Self {
        Self::UnsafeSqlFragment(fragment.into())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    pub fn unknown_database(name: impl Into<String>) -> Self {
        Self::UnknownDatabase(name.into())
    }

    /// Whether retrying the same operation unchanged might succeed —
    /// timeouts and version races are, everything else is a caller bug or a
    /// permanent driver fault.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::VersionMismatch)
    }
}
