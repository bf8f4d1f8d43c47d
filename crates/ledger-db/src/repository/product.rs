//! # Product Repository
//!
//! Database operations for products and their stock movements.
//!
//! ## Stock Ledger
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How Stock Is Tracked                                 │
//! │                                                                         │
//! │  products.stock_qty is a cached running total:                         │
//! │                                                                         │
//! │     stock_qty = initial_stock + Σ inventory_transactions.change_qty    │
//! │                                                                         │
//! │  apply_stock_change() is the only writer of stock_qty and always       │
//! │  appends the matching inventory row in the same statement batch:      │
//! │                                                                         │
//! │  ┌──────────────────────────────┐   ┌────────────────────────────────┐ │
//! │  │ inventory_transactions       │   │ products                       │ │
//! │  │ + (P1, -2.00, Sale, S1)      │ → │ P1.stock_qty = 10.00 - 2.00    │ │
//! │  └──────────────────────────────┘   └────────────────────────────────┘ │
//! │                                                                         │
//! │  Rolling back the caller's transaction undoes both.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use ledger_core::{InventoryKind, InventoryTransaction, Money, Product, Quantity};

const PRODUCT_COLUMNS: &str = r#"
    id, sku, name, stock_qty, initial_stock, conversion_to_base,
    cost_price, reorder_level, created_at, updated_at
"#;

/// Fields needed to register a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub initial_stock: Quantity,
    pub conversion_to_base: Quantity,
    pub cost_price: Money,
    pub reorder_level: Quantity,
}

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = ProductRepository::new(pool);
/// let product = repo.get_by_id("uuid-here").await?;
///
/// // inside a transaction
/// ProductRepository::apply_stock_change(&mut tx, &product.id, -qty, InventoryKind::Sale, Some(&sale_id)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Lists products ordered by SKU.
    pub async fn list(&self, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products ORDER BY sku LIMIT ?1",
            PRODUCT_COLUMNS
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Stock movements of a product, oldest first.
    pub async fn list_transactions(&self, product_id: &str) -> DbResult<Vec<InventoryTransaction>> {
        let transactions = sqlx::query_as::<_, InventoryTransaction>(
            r#"
            SELECT id, product_id, change_qty, kind, ref_id, created_at
            FROM inventory_transactions
            WHERE product_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transactions)
    }

    /// Stock recomputed from the movement log: `initial_stock + Σ change_qty`.
    pub async fn ledger_stock(&self, product_id: &str) -> DbResult<Quantity> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT p.initial_stock + COALESCE(
                (SELECT SUM(change_qty) FROM inventory_transactions WHERE product_id = p.id), 0)
            FROM products p
            WHERE p.id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        total
            .map(Quantity::from_hundredths)
            .ok_or_else(|| DbError::not_found("Product", product_id))
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    /// Loads a product inside the caller's transaction.
    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(product)
    }

    /// Inserts a product with its opening stock.
    pub async fn insert(conn: &mut SqliteConnection, new: &NewProduct) -> DbResult<Product> {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: new.sku.clone(),
            name: new.name.clone(),
            stock_qty: new.initial_stock,
            initial_stock: new.initial_stock,
            conversion_to_base: new.conversion_to_base,
            cost_price: new.cost_price,
            reorder_level: new.reorder_level,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, stock_qty, initial_stock, conversion_to_base,
                cost_price, reorder_level, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.stock_qty)
        .bind(product.initial_stock)
        .bind(product.conversion_to_base)
        .bind(product.cost_price)
        .bind(product.reorder_level)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(product)
    }

    /// Appends an inventory transaction and moves `stock_qty` by the same amount.
    ///
    /// ## Arguments
    /// * `change` - Signed change in base units (negative for a sale)
    /// * `kind` - Purchase, Sale or Adjustment
    /// * `ref_id` - Sale or document that caused the movement
    ///
    /// ## Returns
    /// The appended inventory row.
    pub async fn apply_stock_change(
        conn: &mut SqliteConnection,
        product_id: &str,
        change: Quantity,
        kind: InventoryKind,
        ref_id: Option<&str>,
    ) -> DbResult<InventoryTransaction> {
        let now = Utc::now();

        debug!(
            product_id = %product_id,
            change = %change,
            kind = ?kind,
            "Applying stock change"
        );

        let result = sqlx::query(
            r#"
            UPDATE products SET
                stock_qty = stock_qty + ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(product_id)
        .bind(change)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }

        let entry = InventoryTransaction {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            change_qty: change,
            kind,
            ref_id: ref_id.map(String::from),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO inventory_transactions (id, product_id, change_qty, kind, ref_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.product_id)
        .bind(entry.change_qty)
        .bind(entry.kind)
        .bind(&entry.ref_id)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn widget() -> NewProduct {
        NewProduct {
            sku: "WIDGET".to_string(),
            name: "Widget".to_string(),
            initial_stock: Quantity::from_units(10),
            conversion_to_base: Quantity::ONE,
            cost_price: Money::from_cents(6000),
            reorder_level: Quantity::from_units(2),
        }
    }

    #[tokio::test]
    async fn test_list_orders_by_sku_and_limits() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.products().list(10).await.unwrap().is_empty());

        let mut tx = db.begin().await.unwrap();
        for sku in ["ZETA", "ALPHA", "MID"] {
            ProductRepository::insert(
                &mut tx,
                &NewProduct {
                    sku: sku.to_string(),
                    ..widget()
                },
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let skus: Vec<String> = db.products().list(2).await.unwrap().into_iter().map(|p| p.sku).collect();
        assert_eq!(skus, vec!["ALPHA".to_string(), "MID".to_string()]);
    }

    #[tokio::test]
    async fn test_stock_change_keeps_ledger_in_step() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let product = ProductRepository::insert(&mut tx, &widget()).await.unwrap();
        ProductRepository::apply_stock_change(
            &mut tx,
            &product.id,
            Quantity::from_units(-2),
            InventoryKind::Sale,
            Some("sale-1"),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock_qty, Quantity::from_units(8));
        assert_eq!(db.products().ledger_stock(&product.id).await.unwrap(), stored.stock_qty);

        let movements = db.products().list_transactions(&product.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, InventoryKind::Sale);
    }

    #[tokio::test]
    async fn test_rollback_restores_stock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let product = ProductRepository::insert(&mut tx, &widget()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        ProductRepository::apply_stock_change(
            &mut tx,
            &product.id,
            Quantity::from_units(-5),
            InventoryKind::Sale,
            None,
        )
        .await
        .unwrap();
        drop(tx);

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock_qty, Quantity::from_units(10));
        assert!(db.products().list_transactions(&product.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let err = ProductRepository::apply_stock_change(
            &mut tx,
            "missing",
            Quantity::ONE,
            InventoryKind::Purchase,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
