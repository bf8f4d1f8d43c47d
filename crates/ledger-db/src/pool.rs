//! # Database Handle
//!
//! SQLite pool setup and the transaction entry point for ledger writes.
//!
//! ## Connection Roles
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SqlitePool (WAL)                               │
//! │                                                                         │
//! │   db.begin() ──────► BEGIN IMMEDIATE, one per ledger operation         │
//! │                      sale + items + stock + payments + balance + audit │
//! │                                                                         │
//! │   db.counters() ───► autocommit INSERT … RETURNING, own connection     │
//! │                      never inside a write transaction                  │
//! │                                                                         │
//! │   db.sales() etc ──► pool reads, any free connection                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `:memory:` gets exactly one connection because every SQLite in-memory
//! connection is a separate database. With that pool a read issued while the
//! same task holds a transaction waits on itself until the acquire timeout.
//! On a file database the same holds for writes: a counter bump issued
//! while the caller holds `begin()` waits on its own write lock.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations::{self, MigrationStatus};
use crate::repository::audit::AuditRepository;
use crate::repository::counter::CounterRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::settings::SettingsRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Pool settings.
///
/// ```rust,ignore
/// let config = DbConfig::new("./data/ledger.db").max_connections(8);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// How long `begin()` or a read waits for a free connection.
    pub acquire_timeout: Duration,
    /// How long a statement waits on another writer's lock before `Busy`.
    pub busy_timeout: Duration,
    pub run_migrations: bool,
}

impl DbConfig {
    /// Path value that selects an in-memory database.
    pub const IN_MEMORY: &'static str = ":memory:";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Isolated single-connection database, for tests and tooling.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            ..DbConfig::new(Self::IN_MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == Self::IN_MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let url = if self.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", self.database_path.display())
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Sale items, payments and versions all reference their sale
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
            .create_if_missing(true);
        Ok(options)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Cloneable handle to the ledger database.
///
/// ```rust,ignore
/// let mut tx = db.begin().await?;
/// SaleRepository::insert(&mut tx, &sale).await?;
/// ProductRepository::apply_stock_change(&mut tx, &product_id, -qty, InventoryKind::Sale, Some(&sale.id)).await?;
/// tx.commit().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening ledger database");

        let in_memory = config.is_in_memory();
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { config.max_connections })
            .min_connections(if in_memory { 1 } else { 0 })
            .acquire_timeout(config.acquire_timeout)
            // An in-memory database lives exactly as long as its connection
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(max_connections = config.max_connections, in_memory, "Pool created");

        let db = Database { pool };
        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }
        Ok(db)
    }

    /// Embedded vs. applied migration counts.
    pub async fn schema_status(&self) -> DbResult<MigrationStatus> {
        migrations::migration_status(&self.pool).await
    }

    /// Opens a write transaction with `BEGIN IMMEDIATE`.
    ///
    /// The write lock is taken up front, so concurrent writers queue on
    /// `busy_timeout` instead of failing with a stale WAL snapshot when they
    /// upgrade from reading. Dropping without `commit()` rolls everything
    /// back, stock and balances included.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Deferred transaction for a consistent multi-statement read.
    pub async fn begin_read(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.pool.clone())
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Atomic invoice sequence.
    pub fn counters(&self) -> CounterRepository {
        CounterRepository::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    pub fn audit(&self) -> AuditRepository {
        AuditRepository::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_schema_is_current() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let status = db.schema_status().await.unwrap();
        assert!(status.is_current());
        assert!(status.embedded >= 1);
    }

    #[tokio::test]
    async fn test_migrations_seed_default_vat() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let vat = db.settings().get("vat_percent").await.unwrap();
        assert_eq!(vat.as_deref(), Some("5"));
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/ledger.db").max_connections(10);
        assert_eq!(config.max_connections, 10);
        assert!(!config.is_in_memory());

        let memory = DbConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.max_connections, 1);
    }
}
