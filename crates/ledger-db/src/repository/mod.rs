//! # Repository Module
//!
//! Database repository implementations for the sales ledger.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Kinds of Repository Calls                        │
//! │                                                                         │
//! │  Reads (pool-backed, &self)                                            │
//! │       db.sales().get_by_id(id)                                         │
//! │       db.payments().list_for_sale(sale_id)                             │
//! │                                                                         │
//! │  Writes (associated functions, &mut SqliteConnection)                  │
//! │       let mut tx = db.begin().await?;                                  │
//! │       SaleRepository::insert(&mut tx, &sale)                           │
//! │       ProductRepository::apply_stock_change(&mut tx, ...)              │
//! │       AuditRepository::record(&mut tx, ...)                            │
//! │       tx.commit().await?;                                              │
//! │                                                                         │
//! │  The engine owns the transaction; repositories never commit.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Products and inventory transactions
//! - [`CustomerRepository`] - Customers and balances
//! - [`SaleRepository`] - Sales, sale items and version snapshots
//! - [`PaymentRepository`] - Payments and idempotency records
//! - [`CounterRepository`] - Atomic invoice counter
//! - [`SettingsRepository`] - Key/value settings (VAT)
//! - [`AuditRepository`] - Audit log
//!
//! [`ProductRepository`]: product::ProductRepository
//! [`CustomerRepository`]: customer::CustomerRepository
//! [`SaleRepository`]: sale::SaleRepository
//! [`PaymentRepository`]: payment::PaymentRepository
//! [`CounterRepository`]: counter::CounterRepository
//! [`SettingsRepository`]: settings::SettingsRepository
//! [`AuditRepository`]: audit::AuditRepository

pub mod audit;
pub mod counter;
pub mod customer;
pub mod payment;
pub mod product;
pub mod sale;
pub mod settings;
