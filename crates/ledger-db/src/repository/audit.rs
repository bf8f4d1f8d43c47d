//! # Audit Log Repository
//!
//! One immutable row per mutating ledger operation.
//!
//! ## Outbox Style
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  1. UPDATE sales / payments / products ...                             │
//! │                                                                         │
//! │  2. INSERT INTO audit_log (actor, action, entity, before, after)       │
//! │                                                                         │
//! │  COMMIT ← the entry exists exactly when the change does                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use ledger_core::AuditEntry;

/// What is being recorded, before it gets an ID and timestamp.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub actor: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Repository for audit log operations.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Entries for one entity, oldest first.
    pub async fn list_for_entity(&self, entity_type: &str, entity_id: &str) -> DbResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, actor, action, entity_type, entity_id,
                   before_summary, after_summary, created_at
            FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Appends an entry inside the caller's transaction.
    pub async fn record(conn: &mut SqliteConnection, record: AuditRecord<'_>) -> DbResult<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            actor: record.actor.to_string(),
            action: record.action.to_string(),
            entity_type: record.entity_type.to_string(),
            entity_id: record.entity_id.to_string(),
            before_summary: record.before,
            after_summary: record.after,
            created_at: Utc::now(),
        };

        debug!(
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "Writing audit entry"
        );

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, actor, action, entity_type, entity_id,
                before_summary, after_summary, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.before_summary)
        .bind(&entry.after_summary)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_entry_only_exists_after_commit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: "u1",
                action: "sale.create",
                entity_type: "sale",
                entity_id: "s1",
                before: None,
                after: Some("grand_total=210.00".into()),
            },
        )
        .await
        .unwrap();
        drop(tx);

        assert!(db.audit().list_for_entity("sale", "s1").await.unwrap().is_empty());
    }
}
