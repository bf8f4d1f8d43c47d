//! # Schema Migrations
//!
//! SQL files under `migrations/sqlite/` are embedded at compile time and
//! applied in filename order on [`Database::new`](crate::Database::new).
//!
//! ```text
//! 001_initial_schema.sql
//!   products, customers, sales, sale_items, payments,
//!   payment_idempotency, invoice_versions, inventory_transactions,
//!   counters, settings (vat_percent = 5), audit_log
//!   + partial unique indexes on live invoice_no / external_ref
//! ```
//!
//! Applied files are never edited; schema changes go into a new
//! `NNN_description.sql`.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(migrations = MIGRATOR.migrations.len(), "Ledger schema up to date");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied: usize::try_from(applied).unwrap_or(0),
    })
}
