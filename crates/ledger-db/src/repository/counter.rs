//! # Counter Repository
//!
//! Named, increment-only sequences backing invoice numbering.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  next_value("invoice", floor = 2000)                                    │
//! │                                                                         │
//! │  INSERT INTO counters (name, value) VALUES ('invoice', 2000)           │
//! │  ON CONFLICT(name) DO UPDATE SET value = MAX(value + 1, 2000)          │
//! │  RETURNING value                                                        │
//! │                                                                         │
//! │  • one autocommit statement on its own pool connection                 │
//! │  • never part of a sale transaction, so a rolled back sale leaves a    │
//! │    gap in the sequence instead of a duplicate                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for the atomic counters.
#[derive(Debug, Clone)]
pub struct CounterRepository {
    pool: SqlitePool,
}

impl CounterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CounterRepository { pool }
    }

    /// Atomically increments `name` and returns the new value.
    ///
    /// The first call returns `floor`; later calls return the previous value
    /// plus one, raised to `floor` if the floor has been moved up since.
    pub async fn next_value(&self, name: &str, floor: u64) -> DbResult<u64> {
        let floor = i64::try_from(floor)
            .map_err(|_| DbError::Internal(format!("counter floor {} out of range", floor)))?;

        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value = MAX(value + 1, excluded.value)
            RETURNING value
            "#,
        )
        .bind(name)
        .bind(floor)
        .fetch_one(&self.pool)
        .await?;

        debug!(counter = %name, value, "Counter advanced");

        u64::try_from(value).map_err(|_| DbError::Internal(format!("counter {} is negative", name)))
    }

    /// Current value without advancing, `None` if never used.
    pub async fn current(&self, name: &str) -> DbResult<Option<u64>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.and_then(|v| u64::try_from(v).ok()))
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_counter_starts_at_floor_and_increments() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let counters = db.counters();

        assert_eq!(counters.current("invoice").await.unwrap(), None);
        assert_eq!(counters.next_value("invoice", 2000).await.unwrap(), 2000);
        assert_eq!(counters.next_value("invoice", 2000).await.unwrap(), 2001);
        assert_eq!(counters.current("invoice").await.unwrap(), Some(2001));
    }

    #[tokio::test]
    async fn test_counter_respects_raised_floor() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let counters = db.counters();

        counters.next_value("invoice", 10).await.unwrap();
        assert_eq!(counters.next_value("invoice", 5000).await.unwrap(), 5000);
        assert_eq!(counters.next_value("invoice", 10).await.unwrap(), 5001);
    }
}
