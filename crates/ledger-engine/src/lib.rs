//! # ledger-engine: Invoice / Payment Ledger Engine
//!
//! Owns every write that has to keep invoices, stock, payments and customer
//! balances consistent with each other.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          LedgerEngine                                   │
//! │                                                                         │
//! │  ┌──────────────────────────┐        ┌──────────────────────────┐      │
//! │  │  SaleTransactionManager  │        │      PaymentLedger       │      │
//! │  │                          │        │                          │      │
//! │  │  create (retry+backoff)  │        │  create (idempotent)     │      │
//! │  │  update / restore        │        │  update_status / update  │      │
//! │  │  delete / lock           │        │  delete / allocate       │      │
//! │  └─────┬──────────────┬─────┘        └────────────┬─────────────┘      │
//! │        │              │                           │                     │
//! │        ▼              ▼                           ▼                     │
//! │  ┌────────────┐  ┌─────────────────────────────────────────────┐       │
//! │  │ Invoice-   │  │             BalanceReconciler               │       │
//! │  │ Number-    │  │  runs after every commit, rewrites balance  │       │
//! │  │ Allocator  │  │  from Σ invoices − Σ cleared payments       │       │
//! │  └────────────┘  └─────────────────────────────────────────────┘       │
//! │                                                                         │
//! │  One SQLite transaction per operation. Alerts and post-commit hooks    │
//! │  fire only after COMMIT and never roll anything back.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`sales`] - Invoice create / update / delete / version restore
//! - [`payments`] - Payment recording, status changes, allocation
//! - [`allocator`] - Invoice numbering with a scan fallback
//! - [`reconciler`] - Customer balance recomputation
//! - [`notify`] - Alerts and post-commit hooks
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_engine::{CreateSaleRequest, EngineConfig, LedgerEngine};
//!
//! let engine = LedgerEngine::open(EngineConfig::load_or_default(None)).await?;
//!
//! let outcome = engine.sales().create(request, "cashier-1").await?;
//! println!("Invoice {} total {}", outcome.sale.invoice_no, outcome.sale.grand_total);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod config;
pub mod error;
pub mod notify;
pub mod payments;
pub mod reconciler;
pub mod sales;

mod effects;

// =============================================================================
// Re-exports
// =============================================================================

pub use allocator::{fallback_lock, FallbackLock, InvoiceNumberAllocator, SequenceSource};
pub use config::EngineConfig;
pub use error::{ConflictKind, EngineError, EngineResult};
pub use notify::{Alert, AlertSink, CommitEvent, HookError, Notifier, PostCommitHook, TracingAlertSink};
pub use payments::{
    AllocatePaymentRequest, AllocationOutcome, AllocationTarget, CreatePaymentRequest, PaymentLedger,
    PaymentOutcome, SkippedAllocation, UpdatePaymentRequest,
};
pub use reconciler::{BalanceReconciler, LedgerSummary, Reconciliation};
pub use sales::{
    CreateSaleRequest, InlinePayment, SaleDetail, SaleLineRequest, SaleOutcome, SaleTransactionManager,
    UpdateSaleRequest,
};

use std::sync::Arc;

use tracing::info;

use ledger_db::Database;

// =============================================================================
// Engine
// =============================================================================

/// Wires the managers to one database and one notifier.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    db: Database,
    config: Arc<EngineConfig>,
    sales: SaleTransactionManager,
    payments: PaymentLedger,
    reconciler: BalanceReconciler,
    allocator: InvoiceNumberAllocator,
}

impl LedgerEngine {
    /// Opens the configured database with default alerting and no hooks.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        LedgerEngine::builder(config).build().await
    }

    pub fn builder(config: EngineConfig) -> LedgerEngineBuilder {
        LedgerEngineBuilder {
            config,
            database: None,
            alert_sink: None,
            hooks: Vec::new(),
            sequence: None,
            fallback_lock: None,
        }
    }

    pub fn sales(&self) -> &SaleTransactionManager {
        &self.sales
    }

    pub fn payments(&self) -> &PaymentLedger {
        &self.payments
    }

    pub fn reconciler(&self) -> &BalanceReconciler {
        &self.reconciler
    }

    pub fn allocator(&self) -> &InvoiceNumberAllocator {
        &self.allocator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying database, for reads and fixtures.
    pub fn db(&self) -> &Database {
        &self.db
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct LedgerEngineBuilder {
    config: EngineConfig,
    database: Option<Database>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    hooks: Vec<Arc<dyn PostCommitHook>>,
    sequence: Option<Arc<dyn SequenceSource>>,
    fallback_lock: Option<FallbackLock>,
}

impl LedgerEngineBuilder {
    /// Uses an already opened database instead of `config.database`.
    pub fn database(mut self, db: Database) -> Self {
        self.database = Some(db);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn post_commit_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replaces the counter table as the primary numbering source.
    pub fn sequence_source(mut self, sequence: Arc<dyn SequenceSource>) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Shares the fallback scan lock with other engines in the process.
    pub fn fallback_lock(mut self, lock: FallbackLock) -> Self {
        self.fallback_lock = Some(lock);
        self
    }

    pub async fn build(self) -> EngineResult<LedgerEngine> {
        self.config.validate()?;

        let db = match self.database {
            Some(db) => db,
            None => Database::new(self.config.db_config()).await?,
        };

        let schema = db.schema_status().await?;
        if !schema.is_current() {
            return Err(EngineError::Config(format!(
                "database schema behind: {} of {} migrations applied",
                schema.applied, schema.embedded
            )));
        }

        let alerts = self.alert_sink.unwrap_or_else(|| Arc::new(TracingAlertSink));
        let notifier = Notifier::new(alerts, self.hooks);

        let sequence = self
            .sequence
            .unwrap_or_else(|| Arc::new(db.counters()) as Arc<dyn SequenceSource>);
        let allocator = InvoiceNumberAllocator::new(
            db.sales(),
            sequence,
            self.fallback_lock.unwrap_or_else(fallback_lock),
            self.config.invoice.clone(),
        );

        let config = Arc::new(self.config);
        let reconciler = BalanceReconciler::new(db.clone(), notifier.clone());
        let sales = SaleTransactionManager::new(
            db.clone(),
            allocator.clone(),
            reconciler.clone(),
            notifier.clone(),
            Arc::clone(&config),
        );
        let payments = PaymentLedger::new(db.clone(), reconciler.clone(), notifier);

        info!(
            database = %config.database.path.display(),
            invoice_floor = config.invoice.floor,
            max_attempts = config.retry.max_attempts,
            "Ledger engine ready"
        );

        Ok(LedgerEngine {
            db,
            config,
            sales,
            payments,
            reconciler,
            allocator,
        })
    }
}
