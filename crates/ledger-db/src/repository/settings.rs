//! # Settings Repository
//!
//! Key/value settings. The engine reads `vat_percent` at the start of every
//! totals computation.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;

/// Key holding the VAT percentage as a decimal string (`"5"`, `"7.5"`).
pub const VAT_PERCENT_KEY: &str = "vat_percent";

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reads a setting inside the caller's transaction.
    pub async fn find(conn: &mut SqliteConnection, key: &str) -> DbResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let settings = db.settings();

        settings.set(VAT_PERCENT_KEY, "7.5").await.unwrap();
        assert_eq!(settings.get(VAT_PERCENT_KEY).await.unwrap().as_deref(), Some("7.5"));
        assert_eq!(settings.get("missing").await.unwrap(), None);
    }
}
