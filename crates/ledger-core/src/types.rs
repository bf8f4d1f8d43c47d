//! # Domain Types
//!
//! Core ledger entities and the closed enums that describe their state.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │    Payment      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  stock_qty      │   │  invoice_no     │   │  sale_id?       │       │
//! │  │  conversion     │   │  grand_total    │   │  mode / status  │       │
//! │  │  reorder_level  │   │  paid_amount    │   │  row_version    │       │
//! │  └─────────────────┘   │  version        │   └─────────────────┘       │
//! │                        │  row_version    │                              │
//! │  ┌─────────────────┐   └─────────────────┘   ┌─────────────────┐       │
//! │  │   Customer      │                         │ InventoryTxn    │       │
//! │  │  balance        │   SaleItem (per line)   │ change_qty (±)  │       │
//! │  │  credit_limit   │   VersionSnapshot       │ append-only     │       │
//! │  └─────────────────┘                         └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Strict Enums
//! Every string-typed state at the storage or request boundary is a closed
//! enum. `FromStr` rejects unknown values with
//! [`ValidationError::NotAllowed`] instead of falling back to a default.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, ValidationError};
use crate::money::{Money, Quantity, CENT_TOLERANCE};

// =============================================================================
// Tax Rate
// =============================================================================

/// VAT rate in basis points (500 = 5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Converts a percentage such as `5` or `7.5` into basis points.
    ///
    /// Returns `None` for negative values or more than two decimal places
    /// of a percent.
    pub fn from_percent(pct: Decimal) -> Option<Self> {
        if pct.is_sign_negative() {
            return None;
        }
        let bps = pct * Decimal::ONE_HUNDRED;
        if bps.fract() != Decimal::ZERO {
            return None;
        }
        bps.to_u32().map(TaxRate)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Percentage for display and snapshots.
    pub fn percent(&self) -> Decimal {
        Decimal::new(self.0 as i64, 2)
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    /// 5% is the default VAT when settings carry no value.
    fn default() -> Self {
        TaxRate(500)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Settlement state of an invoice, derived from `paid_amount` vs `grand_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "TEXT"))]
pub enum SalePaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl SalePaymentStatus {
    /// Derives the status with a one-cent tolerance.
    ///
    /// ```rust
    /// use ledger_core::{Money, SalePaymentStatus};
    ///
    /// let total = Money::from_cents(21000);
    /// assert_eq!(SalePaymentStatus::derive(Money::zero(), total), SalePaymentStatus::Pending);
    /// assert_eq!(SalePaymentStatus::derive(Money::from_cents(5000), total), SalePaymentStatus::Partial);
    /// assert_eq!(SalePaymentStatus::derive(Money::from_cents(20999), total), SalePaymentStatus::Paid);
    /// ```
    pub fn derive(paid: Money, grand_total: Money) -> Self {
        if paid >= grand_total - CENT_TOLERANCE {
            SalePaymentStatus::Paid
        } else if paid.is_positive() {
            SalePaymentStatus::Partial
        } else {
            SalePaymentStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SalePaymentStatus::Pending => "Pending",
            SalePaymentStatus::Partial => "Partial",
            SalePaymentStatus::Paid => "Paid",
        }
    }
}

impl fmt::Display for SalePaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SalePaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SalePaymentStatus::Pending),
            "Partial" => Ok(SalePaymentStatus::Partial),
            "Paid" => Ok(SalePaymentStatus::Paid),
            _ => Err(ValidationError::not_allowed(
                "payment_status",
                &["Pending", "Partial", "Paid"],
            )),
        }
    }
}

/// How a payment was tendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "TEXT", rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMode {
    Cash,
    Cheque,
    Online,
    Credit,
}

impl PaymentMode {
    /// Status a new payment starts in: cash and online funds are received
    /// immediately, cheques and credit wait to be cleared.
    pub fn initial_status(&self) -> PaymentStatus {
        match self {
            PaymentMode::Cash | PaymentMode::Online => PaymentStatus::Cleared,
            PaymentMode::Cheque | PaymentMode::Credit => PaymentStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "CASH",
            PaymentMode::Cheque => "CHEQUE",
            PaymentMode::Online => "ONLINE",
            PaymentMode::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(PaymentMode::Cash),
            "CHEQUE" => Ok(PaymentMode::Cheque),
            "ONLINE" => Ok(PaymentMode::Online),
            "CREDIT" => Ok(PaymentMode::Credit),
            _ => Err(ValidationError::not_allowed(
                "mode",
                &["CASH", "CHEQUE", "ONLINE", "CREDIT"],
            )),
        }
    }
}

/// Lifecycle state of a payment. Only `Cleared` payments move money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "TEXT", rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Cleared,
    Returned,
    Void,
}

impl PaymentStatus {
    #[inline]
    pub fn is_cleared(&self) -> bool {
        matches!(self, PaymentStatus::Cleared)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Cleared => "CLEARED",
            PaymentStatus::Returned => "RETURNED",
            PaymentStatus::Void => "VOID",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "CLEARED" => Ok(PaymentStatus::Cleared),
            "RETURNED" => Ok(PaymentStatus::Returned),
            "VOID" => Ok(PaymentStatus::Void),
            _ => Err(ValidationError::not_allowed(
                "status",
                &["PENDING", "CLEARED", "RETURNED", "VOID"],
            )),
        }
    }
}

/// Reason for a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "TEXT"))]
pub enum InventoryKind {
    Purchase,
    Sale,
    Adjustment,
}

impl FromStr for InventoryKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Purchase" => Ok(InventoryKind::Purchase),
            "Sale" => Ok(InventoryKind::Sale),
            "Adjustment" => Ok(InventoryKind::Adjustment),
            _ => Err(ValidationError::not_allowed(
                "inventory_kind",
                &["Purchase", "Sale", "Adjustment"],
            )),
        }
    }
}

// =============================================================================
// Product & Customer
// =============================================================================

/// Stock view of a product.
///
/// `stock_qty` is always `initial_stock + Σ inventory_transactions.change_qty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    /// Current stock in base units.
    pub stock_qty: Quantity,
    pub initial_stock: Quantity,
    /// Base units per sold unit (a box of 12 has conversion 12.00).
    pub conversion_to_base: Quantity,
    pub cost_price: Money,
    pub reorder_level: Quantity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// True once stock falls to or below the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.stock_qty <= self.reorder_level
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub name: String,
    /// Amount owed by the customer; negative when they hold credit.
    pub balance: Money,
    /// Zero means no limit.
    pub credit_limit: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn exceeds_credit_limit(&self, balance: Money) -> bool {
        self.credit_limit.is_positive() && balance > self.credit_limit
    }
}

// =============================================================================
// Sale (Invoice)
// =============================================================================

/// A sales invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    /// Unique among non-deleted sales; immutable after creation.
    pub invoice_no: String,
    /// `None` for a cash customer.
    pub customer_id: Option<String>,
    /// Caller-supplied reference used to make Create idempotent.
    pub external_ref: Option<String>,
    pub invoice_date: DateTime<Utc>,
    pub subtotal: Money,
    pub vat_total: Money,
    pub discount: Money,
    pub grand_total: Money,
    pub paid_amount: Money,
    pub payment_status: SalePaymentStatus,
    /// Edit counter, starts at 1.
    pub version: i64,
    pub is_deleted: bool,
    pub is_locked: bool,
    /// Concurrency token, changes on every write to the row.
    pub row_version: i64,
    pub notes: Option<String>,
    pub created_by: String,
    pub last_modified_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// `grand_total − paid_amount`, never negative.
    pub fn outstanding(&self) -> Money {
        (self.grand_total - self.paid_amount).non_negative()
    }

    pub fn is_cash_sale(&self) -> bool {
        self.customer_id.is_none()
    }

    pub fn is_fully_paid(&self) -> bool {
        self.outstanding() <= CENT_TOLERANCE
    }
}

/// A line on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    /// Stock consumed, in base units (`quantity × conversion_to_base`).
    pub base_quantity: Quantity,
    pub vat_amount: Money,
    pub line_total: Money,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    /// `None` for an on-account payment not tied to an invoice.
    pub sale_id: Option<String>,
    pub customer_id: String,
    pub amount: Money,
    pub mode: PaymentMode,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub row_version: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Amount this payment currently contributes to paid totals.
    pub fn effective_amount(&self) -> Money {
        if self.status.is_cleared() {
            self.amount
        } else {
            Money::zero()
        }
    }
}

/// Maps an idempotency key to the payment it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PaymentIdempotencyRecord {
    pub key: String,
    pub payment_id: String,
    /// JSON of the payment as first returned.
    pub snapshot: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Versions, Inventory, Audit
// =============================================================================

/// Pre-edit state of an invoice. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoiceVersionSnapshot {
    pub id: String,
    pub sale_id: String,
    pub version_number: i64,
    pub data_json: String,
    pub edit_reason: String,
    pub diff_summary: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl InvoiceVersionSnapshot {
    /// Decodes the stored invoice state.
    pub fn data(&self) -> Result<SaleSnapshot, CoreError> {
        SaleSnapshot::from_json(&self.data_json)
    }
}

/// Serialized form of a sale and its lines, as stored in version snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleSnapshot {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

impl SaleSnapshot {
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Snapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::Snapshot(e.to_string()))
    }
}

/// Append-only stock movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryTransaction {
    pub id: String,
    pub product_id: String,
    /// Signed change in base units.
    pub change_qty: Quantity,
    pub kind: InventoryKind,
    pub ref_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One immutable record per mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuditEntry {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before_summary: Option<String>,
    pub after_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
