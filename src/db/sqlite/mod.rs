mod plans;
mod providers;
mod usage;

pub use plans::SqlitePlanTierRepo;
pub use providers::SqliteProviderConfigRepo;
pub use usage::SqliteUsageRepo;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::{config::SqliteConfig, db::error::DbResult};

/// Open a pool for `config`, running embedded migrations when enabled.
pub async fn connect(config: &SqliteConfig) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(config.create_if_missing)
        .journal_mode(if config.wal_mode {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    if config.run_migrations {
        run_migrations(&pool).await?;
    }

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run SQLite migrations");
    pool
}
