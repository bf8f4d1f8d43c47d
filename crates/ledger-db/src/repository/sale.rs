//! # Sale Repository
//!
//! Database operations for invoices, their line items and version snapshots.
//!
//! ## Invoice Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Invoice Lifecycle                                 │
//! │                                                                         │
//! │  1. FINALIZED                                                          │
//! │     └── insert() + insert_item() per line                              │
//! │         (stock already decremented in the same transaction)            │
//! │                                                                         │
//! │  2. EDITED (any number of times)                                       │
//! │     └── insert_version()  ← snapshot of the pre-edit state             │
//! │     └── delete_items() + insert_item() per new line                    │
//! │     └── save(expected_row_version) ← fails if someone else wrote       │
//! │                                                                         │
//! │  3. DELETED (soft, terminal)                                           │
//! │     └── save() with is_deleted = 1                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Row Version
//! Every write to a sale row goes through [`SaleRepository::save`], which is
//! a compare-and-swap on `row_version`:
//!
//! ```sql
//! UPDATE sales SET ..., row_version = :new WHERE id = :id AND row_version = :expected
//! ```
//!
//! Zero rows affected means another writer got there first.

use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use ledger_core::{InvoiceVersionSnapshot, Money, Sale, SaleItem, SalePaymentStatus};

const SALE_COLUMNS: &str = r#"
    id, invoice_no, customer_id, external_ref, invoice_date,
    subtotal, vat_total, discount, grand_total, paid_amount, payment_status,
    version, is_deleted, is_locked, row_version, notes,
    created_by, last_modified_by, last_modified_at, deleted_by, deleted_at,
    created_at, updated_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, sale_id, product_id, quantity, unit_price, base_quantity,
    vat_amount, line_total, created_at
"#;

const VERSION_COLUMNS: &str = r#"
    id, sale_id, version_number, data_json, edit_reason, diff_summary,
    created_by, created_at
"#;

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID (deleted sales included).
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        fetch_sale(&self.pool, id).await
    }

    /// Gets all items for a sale.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        fetch_items(&self.pool, sale_id).await
    }

    /// Version snapshots of a sale, oldest first.
    pub async fn list_versions(&self, sale_id: &str) -> DbResult<Vec<InvoiceVersionSnapshot>> {
        let sql = format!(
            "SELECT {} FROM invoice_versions WHERE sale_id = ?1 ORDER BY version_number",
            VERSION_COLUMNS
        );
        let versions = sqlx::query_as::<_, InvoiceVersionSnapshot>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(versions)
    }

    pub async fn get_version(
        &self,
        sale_id: &str,
        version_number: i64,
    ) -> DbResult<Option<InvoiceVersionSnapshot>> {
        fetch_version(&self.pool, sale_id, version_number).await
    }

    /// Invoice numbers of the most recently created sales.
    ///
    /// Deleted sales are included so a number is never handed out twice.
    pub async fn recent_invoice_numbers(&self, limit: u32) -> DbResult<Vec<String>> {
        let numbers = sqlx::query_scalar::<_, String>(
            "SELECT invoice_no FROM sales ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(numbers)
    }

    /// Live sale carrying the given external reference.
    pub async fn get_by_external_ref(&self, external_ref: &str) -> DbResult<Option<Sale>> {
        fetch_by_external_ref(&self.pool, external_ref).await
    }

    /// True if a live sale other than `exclude_sale_id` uses `invoice_no`.
    pub async fn is_invoice_no_taken(
        &self,
        invoice_no: &str,
        exclude_sale_id: Option<&str>,
    ) -> DbResult<bool> {
        invoice_no_taken(&self.pool, invoice_no, exclude_sale_id).await
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        fetch_sale(&mut *conn, id).await
    }

    pub async fn find_items(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        fetch_items(&mut *conn, sale_id).await
    }

    /// Live sale carrying the given external reference.
    pub async fn find_by_external_ref(
        conn: &mut SqliteConnection,
        external_ref: &str,
    ) -> DbResult<Option<Sale>> {
        fetch_by_external_ref(&mut *conn, external_ref).await
    }

    pub async fn invoice_no_in_use(
        conn: &mut SqliteConnection,
        invoice_no: &str,
        exclude_sale_id: Option<&str>,
    ) -> DbResult<bool> {
        invoice_no_taken(&mut *conn, invoice_no, exclude_sale_id).await
    }

    /// Inserts a new sale row.
    pub async fn insert(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, invoice_no = %sale.invoice_no, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, invoice_no, customer_id, external_ref, invoice_date,
                subtotal, vat_total, discount, grand_total, paid_amount, payment_status,
                version, is_deleted, is_locked, row_version, notes,
                created_by, last_modified_by, last_modified_at, deleted_by, deleted_at,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21,
                ?22, ?23
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.invoice_no)
        .bind(&sale.customer_id)
        .bind(&sale.external_ref)
        .bind(sale.invoice_date)
        .bind(sale.subtotal)
        .bind(sale.vat_total)
        .bind(sale.discount)
        .bind(sale.grand_total)
        .bind(sale.paid_amount)
        .bind(sale.payment_status)
        .bind(sale.version)
        .bind(sale.is_deleted)
        .bind(sale.is_locked)
        .bind(sale.row_version)
        .bind(&sale.notes)
        .bind(&sale.created_by)
        .bind(&sale.last_modified_by)
        .bind(sale.last_modified_at)
        .bind(&sale.deleted_by)
        .bind(sale.deleted_at)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Writes every mutable column of `sale` if the stored row version is
    /// still `expected_row_version`.
    ///
    /// ## Returns
    /// * `Ok(true)` - Row written
    /// * `Ok(false)` - Row version moved on (or the sale is gone)
    pub async fn save(
        conn: &mut SqliteConnection,
        sale: &Sale,
        expected_row_version: i64,
    ) -> DbResult<bool> {
        debug!(
            id = %sale.id,
            expected_row_version,
            row_version = sale.row_version,
            "Saving sale"
        );

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                customer_id = ?3,
                invoice_date = ?4,
                subtotal = ?5,
                vat_total = ?6,
                discount = ?7,
                grand_total = ?8,
                paid_amount = ?9,
                payment_status = ?10,
                version = ?11,
                is_deleted = ?12,
                is_locked = ?13,
                row_version = ?14,
                notes = ?15,
                last_modified_by = ?16,
                last_modified_at = ?17,
                deleted_by = ?18,
                deleted_at = ?19,
                updated_at = ?20
            WHERE id = ?1 AND row_version = ?2
            "#,
        )
        .bind(&sale.id)
        .bind(expected_row_version)
        .bind(&sale.customer_id)
        .bind(sale.invoice_date)
        .bind(sale.subtotal)
        .bind(sale.vat_total)
        .bind(sale.discount)
        .bind(sale.grand_total)
        .bind(sale.paid_amount)
        .bind(sale.payment_status)
        .bind(sale.version)
        .bind(sale.is_deleted)
        .bind(sale.is_locked)
        .bind(sale.row_version)
        .bind(&sale.notes)
        .bind(&sale.last_modified_by)
        .bind(sale.last_modified_at)
        .bind(&sale.deleted_by)
        .bind(sale.deleted_at)
        .bind(sale.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Sets the paid amount and status, bumping the row version.
    ///
    /// Used by payment operations, which hold the sale's latest state from
    /// inside the same transaction.
    pub async fn set_paid_amount(
        conn: &mut SqliteConnection,
        sale_id: &str,
        paid_amount: Money,
        status: SalePaymentStatus,
    ) -> DbResult<bool> {
        debug!(sale_id = %sale_id, paid_amount = %paid_amount, status = %status, "Updating paid amount");

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                paid_amount = ?2,
                payment_status = ?3,
                row_version = row_version + 1,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(sale_id)
        .bind(paid_amount)
        .bind(status)
        .bind(chrono::Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Adds an item to a sale.
    pub async fn insert_item(conn: &mut SqliteConnection, item: &SaleItem) -> DbResult<()> {
        debug!(sale_id = %item.sale_id, product_id = %item.product_id, "Adding sale item");

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, quantity, unit_price, base_quantity,
                vat_amount, line_total, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.base_quantity)
        .bind(item.vat_amount)
        .bind(item.line_total)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Removes all line items of a sale (an edit replaces them wholesale).
    pub async fn delete_items(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sale_items WHERE sale_id = ?1")
            .bind(sale_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Appends a version snapshot.
    ///
    /// `UNIQUE(sale_id, version_number)` rejects a second snapshot for the
    /// same version.
    pub async fn insert_version(
        conn: &mut SqliteConnection,
        snapshot: &InvoiceVersionSnapshot,
    ) -> DbResult<()> {
        debug!(
            sale_id = %snapshot.sale_id,
            version_number = snapshot.version_number,
            "Recording invoice version"
        );

        sqlx::query(
            r#"
            INSERT INTO invoice_versions (
                id, sale_id, version_number, data_json, edit_reason, diff_summary,
                created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.sale_id)
        .bind(snapshot.version_number)
        .bind(&snapshot.data_json)
        .bind(&snapshot.edit_reason)
        .bind(&snapshot.diff_summary)
        .bind(&snapshot.created_by)
        .bind(snapshot.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Shared queries
// =============================================================================

async fn fetch_sale<'e, E>(executor: E, id: &str) -> DbResult<Option<Sale>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
    let sale = sqlx::query_as::<_, Sale>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(sale)
}

async fn fetch_by_external_ref<'e, E>(executor: E, external_ref: &str) -> DbResult<Option<Sale>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM sales WHERE external_ref = ?1 AND is_deleted = 0",
        SALE_COLUMNS
    );
    let sale = sqlx::query_as::<_, Sale>(&sql)
        .bind(external_ref)
        .fetch_optional(executor)
        .await?;
    Ok(sale)
}

async fn fetch_items<'e, E>(executor: E, sale_id: &str) -> DbResult<Vec<SaleItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at, rowid",
        ITEM_COLUMNS
    );
    let items = sqlx::query_as::<_, SaleItem>(&sql)
        .bind(sale_id)
        .fetch_all(executor)
        .await?;
    Ok(items)
}

async fn invoice_no_taken<'e, E>(
    executor: E,
    invoice_no: &str,
    exclude_sale_id: Option<&str>,
) -> DbResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM sales
        WHERE invoice_no = ?1 AND is_deleted = 0 AND (?2 IS NULL OR id != ?2)
        "#,
    )
    .bind(invoice_no)
    .bind(exclude_sale_id)
    .fetch_one(executor)
    .await?;
    Ok(count > 0)
}

async fn fetch_version<'e, E>(
    executor: E,
    sale_id: &str,
    version_number: i64,
) -> DbResult<Option<InvoiceVersionSnapshot>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM invoice_versions WHERE sale_id = ?1 AND version_number = ?2",
        VERSION_COLUMNS
    );
    let snapshot = sqlx::query_as::<_, InvoiceVersionSnapshot>(&sql)
        .bind(sale_id)
        .bind(version_number)
        .fetch_optional(executor)
        .await?;
    Ok(snapshot)
}
