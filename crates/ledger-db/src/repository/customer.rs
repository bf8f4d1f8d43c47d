//! # Customer Repository
//!
//! Customer rows and the two ways their balance changes:
//!
//! - `adjust_balance` - inline delta inside a sale/payment transaction
//! - `set_balance` - authoritative value written by the reconciler
//!
//! `computed_balance` is the reconciler's formula:
//! `Σ grand_total (non-deleted sales) − Σ amount (CLEARED payments)`.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use ledger_core::{Customer, Money};

const CUSTOMER_COLUMNS: &str = "id, name, balance, credit_limit, created_at, updated_at";

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLUMNS);
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    /// IDs of all customers, for full reconciliation.
    pub async fn list_ids(&self) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM customers ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLUMNS);
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(customer)
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        name: &str,
        credit_limit: Money,
    ) -> DbResult<Customer> {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            balance: Money::zero(),
            credit_limit,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %customer.id, name = %customer.name, "Inserting customer");

        sqlx::query(
            r#"
            INSERT INTO customers (id, name, balance, credit_limit, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(customer.balance)
        .bind(customer.credit_limit)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(customer)
    }

    /// Moves a customer's balance by `delta` (positive = owes more).
    pub async fn adjust_balance(
        conn: &mut SqliteConnection,
        id: &str,
        delta: Money,
    ) -> DbResult<()> {
        if delta.is_zero() {
            return Ok(());
        }

        debug!(customer_id = %id, delta = %delta, "Adjusting customer balance");

        let result = sqlx::query(
            "UPDATE customers SET balance = balance + ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(delta)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }
        Ok(())
    }

    /// Balance derived from source rows.
    pub async fn computed_balance(conn: &mut SqliteConnection, id: &str) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT
                COALESCE((SELECT SUM(grand_total) FROM sales
                          WHERE customer_id = ?1 AND is_deleted = 0), 0)
              - COALESCE((SELECT SUM(amount) FROM payments
                          WHERE customer_id = ?1 AND status = 'CLEARED'), 0)
            "#,
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(Money::from_cents(cents))
    }

    /// Σ per live invoice of `grand_total − paid_amount`.
    pub async fn outstanding_invoices(conn: &mut SqliteConnection, id: &str) -> DbResult<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(grand_total - paid_amount), 0)
            FROM sales
            WHERE customer_id = ?1 AND is_deleted = 0
            "#,
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(Money::from_cents(cents))
    }

    /// Overwrites the stored balance.
    pub async fn set_balance(conn: &mut SqliteConnection, id: &str, balance: Money) -> DbResult<()> {
        let result = sqlx::query("UPDATE customers SET balance = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(balance)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_balance_adjust_and_recompute() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let customer = CustomerRepository::insert(&mut tx, "Acme", Money::zero()).await.unwrap();
        CustomerRepository::adjust_balance(&mut tx, &customer.id, Money::from_cents(500))
            .await
            .unwrap();

        // no sales or payments yet, so the source rows say zero
        let computed = CustomerRepository::computed_balance(&mut tx, &customer.id).await.unwrap();
        assert!(computed.is_zero());
        CustomerRepository::set_balance(&mut tx, &customer.id, computed).await.unwrap();
        tx.commit().await.unwrap();

        let stored = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        assert!(stored.balance.is_zero());
    }

    #[tokio::test]
    async fn test_adjust_unknown_customer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let err = CustomerRepository::adjust_balance(&mut tx, "nobody", Money::from_cents(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
