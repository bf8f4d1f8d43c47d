//! # ledger-core: Pure Business Logic for the Sales Ledger
//!
//! This crate holds the money math, domain types and the validation guard
//! of the invoice/payment ledger as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sales Ledger Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    ledger-engine                                │   │
//! │  │   SaleTransactionManager, PaymentLedger, BalanceReconciler,    │   │
//! │  │   InvoiceNumberAllocator                                        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ledger-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  totals   │  │ validation│  │   │
//! │  │   │   Sale    │  │   Money   │  │ line VAT  │  │  guard    │  │   │
//! │  │   │  Payment  │  │ Quantity  │  │  settle   │  │  report   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ledger-db (Database Layer)                   │   │
//! │  │          SQLite queries, migrations, repositories, counters     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, SaleItem, Payment, Customer, ...)
//! - [`money`] - `Money` in cents and `Quantity` in hundredths
//! - [`totals`] - Line VAT, invoice totals, settlement of paid amounts
//! - [`validation`] - The validation guard
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use ledger_core::money::{Money, Quantity};
//! use ledger_core::totals::{line_amounts, InvoiceTotals};
//! use ledger_core::types::TaxRate;
//!
//! let line = line_amounts(Quantity::from_units(2), Money::from_cents(10_000), TaxRate::from_bps(500));
//! let totals = InvoiceTotals::from_lines([&line], Money::zero());
//!
//! assert_eq!(totals.grand_total.to_string(), "210.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Quantity, CENT_TOLERANCE};
pub use totals::{line_amounts, settle, InvoiceTotals, LineAmounts, Settlement};
pub use types::*;
pub use validation::{ValidationReport, ValidationResult};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest quantity accepted on a single invoice line.
pub const MAX_QUANTITY: Quantity = Quantity::from_units(100_000);

/// Largest unit price accepted on a line (1,000,000.00).
pub const MAX_UNIT_PRICE: Money = Money::from_cents(100_000_000);

/// Largest single payment accepted (10,000,000.00).
pub const MAX_PAYMENT_AMOUNT: Money = Money::from_cents(1_000_000_000);

/// Invoice numbers are at least this many digits.
pub const MIN_INVOICE_DIGITS: usize = 4;

/// Lowest invoice number handed out when nothing is configured.
pub const DEFAULT_INVOICE_FLOOR: u64 = 2000;

/// Stock left after a sale below this percentage of the sold quantity
/// produces a low-stock warning.
pub const LOW_STOCK_MARGIN_PERCENT: i64 = 120;
