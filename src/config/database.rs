use serde::{Deserialize, Serialize};

use super::ConfigError;

/// `[database]`: where provider records, usage history and plan tiers live.
///
/// ```toml
/// [database]
/// type = "sqlite"
/// path = "gateway.db"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum DatabaseConfig {
    /// Everything in process memory. Quota windows reset on restart.
    #[default]
    Memory,

    #[cfg(feature = "database-sqlite")]
    Sqlite(SqliteConfig),
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        matches!(self, DatabaseConfig::Memory)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DatabaseConfig::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(sqlite) => sqlite.validate(),
        }
    }
}

#[cfg(feature = "database-sqlite")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Database file. `:memory:` gives a private database per pool.
    pub path: String,

    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Apply the embedded migrations when the pool is opened.
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Journal in WAL mode so quota reads don't block usage inserts.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[cfg(feature = "database-sqlite")]
impl SqliteConfig {
    /// Single-connection in-memory database with migrations applied.
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".into(),
            create_if_missing: true,
            run_migrations: true,
            wal_mode: false,
            busy_timeout_ms: default_busy_timeout_ms(),
            max_connections: 1,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::Validation("database.path must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
fn default_true() -> bool {
    true
}

#[cfg(feature = "database-sqlite")]
fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[cfg(feature = "database-sqlite")]
fn default_max_connections() -> u32 {
    4
}
