//! # ledger-db
//!
//! SQLite storage for the sales ledger.
//!
//! ```text
//! ledger-engine
//!     │  db.begin() ─► Transaction ─► Repo::insert / save / apply_* (&mut conn)
//!     │  db.sales().get_by_id() ...    pool reads
//!     ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ Database (pool.rs)                                       │
//! │   sales · sale_items · invoice_versions                  │
//! │   payments · payment_idempotency                         │
//! │   products · inventory_transactions                      │
//! │   customers · counters · settings · audit_log            │
//! └──────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! SQLite (WAL, foreign keys on)
//! ```
//!
//! Every repository has two halves: pool-backed reads on `&self`, and
//! associated write functions taking `&mut SqliteConnection` so the engine
//! composes them inside one transaction. Sales and payments are saved with a
//! compare-and-swap on `row_version`.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig};

pub use repository::audit::{AuditRecord, AuditRepository};
pub use repository::counter::CounterRepository;
pub use repository::customer::CustomerRepository;
pub use repository::payment::PaymentRepository;
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::sale::SaleRepository;
pub use repository::settings::{SettingsRepository, VAT_PERCENT_KEY};
