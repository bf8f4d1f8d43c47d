//! # Payment Repository
//!
//! Payment rows and the idempotency records that make payment creation
//! exactly-once.
//!
//! ## Idempotency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Two submissions with key K racing each other                           │
//! │                                                                         │
//! │  tx A: INSERT payments P1 ─► INSERT payment_idempotency (K, P1) ✓      │
//! │  tx B: INSERT payments P2 ─► INSERT payment_idempotency (K, P2) ✗      │
//! │                                     PRIMARY KEY(key) violation          │
//! │                                                                         │
//! │  tx B rolls back (P2 never existed) and replays K → P1.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use ledger_core::{Money, Payment, PaymentIdempotencyRecord};

const PAYMENT_COLUMNS: &str = r#"
    id, sale_id, customer_id, amount, mode, status, reference,
    row_version, created_by, created_at, updated_at
"#;

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        fetch_payment(&self.pool, id).await
    }

    /// Payments linked to a sale, oldest first, in any status.
    pub async fn list_for_sale(&self, sale_id: &str) -> DbResult<Vec<Payment>> {
        fetch_for_sale(&self.pool, sale_id).await
    }

    pub async fn list_for_customer(&self, customer_id: &str) -> DbResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE customer_id = ?1 ORDER BY created_at, rowid",
            PAYMENT_COLUMNS
        );
        let payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(payments)
    }

    pub async fn get_idempotency(&self, key: &str) -> DbResult<Option<PaymentIdempotencyRecord>> {
        fetch_idempotency(&self.pool, key).await
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Payment>> {
        fetch_payment(&mut *conn, id).await
    }

    pub async fn find_for_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<Payment>> {
        fetch_for_sale(&mut *conn, sale_id).await
    }

    /// Σ CLEARED amounts linked to a sale, leaving out `excluding` if given.
    pub async fn cleared_total_for_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
        excluding: Option<&str>,
    ) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM payments
            WHERE sale_id = ?1 AND status = 'CLEARED' AND (?2 IS NULL OR id <> ?2)
            "#,
        )
        .bind(sale_id)
        .bind(excluding)
        .fetch_one(&mut *conn)
        .await?;
        Ok(Money::from_cents(cents))
    }

    pub async fn find_idempotency(
        conn: &mut SqliteConnection,
        key: &str,
    ) -> DbResult<Option<PaymentIdempotencyRecord>> {
        fetch_idempotency(&mut *conn, key).await
    }

    pub async fn insert(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(
            id = %payment.id,
            customer_id = %payment.customer_id,
            amount = %payment.amount,
            mode = %payment.mode,
            "Recording payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, sale_id, customer_id, amount, mode, status, reference,
                row_version, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.sale_id)
        .bind(&payment.customer_id)
        .bind(payment.amount)
        .bind(payment.mode)
        .bind(payment.status)
        .bind(&payment.reference)
        .bind(payment.row_version)
        .bind(&payment.created_by)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Compare-and-swap write of a payment on `row_version`.
    pub async fn save(
        conn: &mut SqliteConnection,
        payment: &Payment,
        expected_row_version: i64,
    ) -> DbResult<bool> {
        debug!(id = %payment.id, status = %payment.status, "Saving payment");

        let result = sqlx::query(
            r#"
            UPDATE payments SET
                sale_id = ?3,
                customer_id = ?4,
                amount = ?5,
                mode = ?6,
                status = ?7,
                reference = ?8,
                row_version = ?9,
                updated_at = ?10
            WHERE id = ?1 AND row_version = ?2
            "#,
        )
        .bind(&payment.id)
        .bind(expected_row_version)
        .bind(&payment.sale_id)
        .bind(&payment.customer_id)
        .bind(payment.amount)
        .bind(payment.mode)
        .bind(payment.status)
        .bind(&payment.reference)
        .bind(payment.row_version)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Moves every payment of a sale to another customer.
    pub async fn reassign_customer(
        conn: &mut SqliteConnection,
        sale_id: &str,
        customer_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                customer_id = ?2,
                row_version = row_version + 1,
                updated_at = ?3
            WHERE sale_id = ?1
            "#,
        )
        .bind(sale_id)
        .bind(customer_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Removes a payment row together with its idempotency records.
    pub async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        sqlx::query("DELETE FROM payment_idempotency WHERE payment_id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        let result = sqlx::query("DELETE FROM payments WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Records `key → payment`. A reused key fails with `UniqueViolation`.
    pub async fn insert_idempotency(
        conn: &mut SqliteConnection,
        record: &PaymentIdempotencyRecord,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_idempotency (key, payment_id, snapshot, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&record.key)
        .bind(&record.payment_id)
        .bind(&record.snapshot)
        .bind(record.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Shared queries
// =============================================================================

async fn fetch_payment<'e, E>(executor: E, id: &str) -> DbResult<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLUMNS);
    let payment = sqlx::query_as::<_, Payment>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(payment)
}

async fn fetch_for_sale<'e, E>(executor: E, sale_id: &str) -> DbResult<Vec<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM payments WHERE sale_id = ?1 ORDER BY created_at, rowid",
        PAYMENT_COLUMNS
    );
    let payments = sqlx::query_as::<_, Payment>(&sql)
        .bind(sale_id)
        .fetch_all(executor)
        .await?;
    Ok(payments)
}

async fn fetch_idempotency<'e, E>(executor: E, key: &str) -> DbResult<Option<PaymentIdempotencyRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let record = sqlx::query_as::<_, PaymentIdempotencyRecord>(
        "SELECT key, payment_id, snapshot, created_at FROM payment_idempotency WHERE key = ?1",
    )
    .bind(key)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}
