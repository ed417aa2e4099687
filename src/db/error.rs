use thiserror::Error;

/// Failure reading or writing one of the gateway's stores.
#[derive(Debug, Error)]
pub enum DbError {
    /// The store could not be reached. Quota checks may fail open on this.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be mapped back onto a model.
    #[error("corrupt {table} row: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[cfg(feature = "database-sqlite")]
    #[error("sqlite: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(feature = "database-sqlite")]
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = Result<T, DbError>;
