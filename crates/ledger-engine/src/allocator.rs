//! # Invoice Number Allocator
//!
//! Hands out sequential, zero-padded invoice numbers.
//!
//! ## Allocation Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        next()                                           │
//! │                          │                                              │
//! │          ┌───────────────┴────────────────┐                             │
//! │          ▼                                ▼                             │
//! │   PRIMARY: SequenceSource          FALLBACK (source failed)             │
//! │   one autocommit statement,        1. sleep random 0..jitter ms         │
//! │   outside every sale tx            2. lock fallback mutex               │
//! │          │                         3. scan recent invoice numbers       │
//! │          │                         4. max trailing digits + 1           │
//! │          │                         5. clamp to floor                    │
//! │          └───────────────┬────────────────┘                             │
//! │                          ▼                                              │
//! │                 format(n) → "2001"                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fallback lock is process-local. Two processes on the fallback path
//! can still pick the same number; the partial unique index rejects the
//! second insert and Create retries with a fresh number.
//!
//! Numbers issued by the scan raise a high-water mark that is passed to the
//! counter as its floor, so a counter that comes back online continues after
//! them. [`resync`](InvoiceNumberAllocator::resync) raises the mark from the
//! stored invoices when another process has issued numbers the counter
//! never saw.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use ledger_core::validation::check_invoice_number;
use ledger_db::{CounterRepository, DbResult, SaleRepository};

use crate::config::InvoiceSettings;
use crate::error::{ConflictKind, EngineError, EngineResult};

/// Counter name used for invoice numbers.
pub const INVOICE_COUNTER: &str = "invoice_no";

/// Atomic, transaction-independent sequence.
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn next_value(&self, name: &str, floor: u64) -> DbResult<u64>;
}

#[async_trait]
impl SequenceSource for CounterRepository {
    async fn next_value(&self, name: &str, floor: u64) -> DbResult<u64> {
        CounterRepository::next_value(self, name, floor).await
    }
}

/// Lock serializing callers of the fallback scan.
///
/// Share one across every allocator in the process.
pub type FallbackLock = Arc<Mutex<()>>;

pub fn fallback_lock() -> FallbackLock {
    Arc::new(Mutex::new(()))
}

#[derive(Clone)]
pub struct InvoiceNumberAllocator {
    sales: SaleRepository,
    sequence: Arc<dyn SequenceSource>,
    fallback_lock: FallbackLock,
    /// Highest number known to be issued outside the counter, 0 if none.
    high_water: Arc<AtomicU64>,
    settings: InvoiceSettings,
}

impl InvoiceNumberAllocator {
    pub fn new(
        sales: SaleRepository,
        sequence: Arc<dyn SequenceSource>,
        fallback_lock: FallbackLock,
        settings: InvoiceSettings,
    ) -> Self {
        InvoiceNumberAllocator {
            sales,
            sequence,
            fallback_lock,
            high_water: Arc::new(AtomicU64::new(0)),
            settings,
        }
    }

    pub fn floor(&self) -> u64 {
        self.settings.floor
    }

    /// Zero-pads `n` to the configured width.
    pub fn format(&self, n: u64) -> String {
        format!("{:0width$}", n, width = self.settings.width)
    }

    /// Allocates the next invoice number.
    pub async fn next(&self) -> EngineResult<String> {
        match self.sequence.next_value(INVOICE_COUNTER, self.counter_floor()).await {
            Ok(n) => {
                debug!(number = n, "Invoice number allocated");
                Ok(self.format(n))
            }
            Err(e) => {
                warn!(error = %e, "Invoice counter unavailable, scanning recent invoices");
                self.next_by_scan().await
            }
        }
    }

    /// Raises the high-water mark to the highest stored invoice number.
    pub async fn resync(&self) -> EngineResult<()> {
        let highest = self.scan_highest().await?;
        if let Some(highest) = highest {
            let previous = self.high_water.fetch_max(highest, Ordering::SeqCst);
            if highest > previous {
                debug!(previous, highest, "Invoice high-water mark raised");
            }
        }
        Ok(())
    }

    fn counter_floor(&self) -> u64 {
        match self.high_water.load(Ordering::SeqCst) {
            0 => self.settings.floor,
            issued => issued.saturating_add(1).max(self.settings.floor),
        }
    }

    async fn scan_highest(&self) -> EngineResult<Option<u64>> {
        let recent = self
            .sales
            .recent_invoice_numbers(self.settings.fallback_scan_limit)
            .await?;
        Ok(recent.iter().filter_map(|no| trailing_number(no)).max())
    }

    async fn next_by_scan(&self) -> EngineResult<String> {
        let jitter = if self.settings.fallback_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.settings.fallback_jitter_ms)
        };
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let _guard = self.fallback_lock.lock().await;

        let next = self
            .scan_highest()
            .await?
            .map(|max| max.saturating_add(1))
            .unwrap_or(self.settings.floor)
            .max(self.settings.floor);
        self.high_water.fetch_max(next, Ordering::SeqCst);

        debug!(number = next, "Invoice number allocated by scan");
        Ok(self.format(next))
    }

    /// True if `invoice_no` is well formed, at or above the floor and not
    /// used by another live invoice.
    pub async fn validate(&self, invoice_no: &str, exclude_sale_id: Option<&str>) -> EngineResult<bool> {
        if check_invoice_number(invoice_no, self.settings.floor).is_err() {
            return Ok(false);
        }
        let taken = self.sales.is_invoice_no_taken(invoice_no, exclude_sale_id).await?;
        Ok(!taken)
    }

    /// Like [`validate`](Self::validate) but says why.
    ///
    /// Bad format is a validation error; a taken number is an
    /// `InvoiceNumber` conflict.
    pub async fn check(&self, invoice_no: &str, exclude_sale_id: Option<&str>) -> EngineResult<()> {
        check_invoice_number(invoice_no, self.settings.floor)?;
        if self.sales.is_invoice_no_taken(invoice_no, exclude_sale_id).await? {
            return Err(EngineError::conflict(
                ConflictKind::InvoiceNumber,
                format!("invoice number {} is already in use", invoice_no),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InvoiceNumberAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceNumberAllocator")
            .field("settings", &self.settings)
            .finish()
    }
}

/// Numeric suffix of an invoice number (`"INV-0042"` → 42).
fn trailing_number(invoice_no: &str) -> Option<u64> {
    let digits_start = invoice_no
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    invoice_no[digits_start..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_db::{Database, DbConfig, DbError};

    struct Unavailable;

    #[async_trait]
    impl SequenceSource for Unavailable {
        async fn next_value(&self, _name: &str, _floor: u64) -> DbResult<u64> {
            Err(DbError::ConnectionFailed("counter store offline".into()))
        }
    }

    /// Real counter that can be switched off.
    struct Flaky {
        counters: CounterRepository,
        offline: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SequenceSource for Flaky {
        async fn next_value(&self, name: &str, floor: u64) -> DbResult<u64> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(DbError::ConnectionFailed("counter store offline".into()));
            }
            self.counters.next_value(name, floor).await
        }
    }

    fn settings() -> InvoiceSettings {
        InvoiceSettings {
            fallback_jitter_ms: 0,
            ..InvoiceSettings::default()
        }
    }

    #[test]
    fn test_trailing_number() {
        assert_eq!(trailing_number("2001"), Some(2001));
        assert_eq!(trailing_number("INV-0042"), Some(42));
        assert_eq!(trailing_number("INV-"), None);
        assert_eq!(trailing_number(""), None);
    }

    #[tokio::test]
    async fn test_counter_path() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let allocator = InvoiceNumberAllocator::new(
            db.sales(),
            Arc::new(db.counters()),
            fallback_lock(),
            settings(),
        );

        assert_eq!(allocator.next().await.unwrap(), "2000");
        assert_eq!(allocator.next().await.unwrap(), "2001");
    }

    #[tokio::test]
    async fn test_fallback_on_empty_ledger_starts_at_floor() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let allocator = InvoiceNumberAllocator::new(
            db.sales(),
            Arc::new(Unavailable),
            fallback_lock(),
            settings(),
        );

        assert_eq!(allocator.next().await.unwrap(), "2000");
    }

    #[tokio::test]
    async fn test_counter_resumes_after_scanned_numbers() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let source = Arc::new(Flaky {
            counters: db.counters(),
            offline: std::sync::atomic::AtomicBool::new(true),
        });
        let allocator = InvoiceNumberAllocator::new(db.sales(), source.clone(), fallback_lock(), settings());

        assert_eq!(allocator.next().await.unwrap(), "2000");

        source.offline.store(false, Ordering::SeqCst);
        assert_eq!(allocator.next().await.unwrap(), "2001");
        assert_eq!(allocator.next().await.unwrap(), "2002");
    }

    #[tokio::test]
    async fn test_format_pads_to_width() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let allocator = InvoiceNumberAllocator::new(
            db.sales(),
            Arc::new(db.counters()),
            fallback_lock(),
            InvoiceSettings {
                width: 6,
                ..settings()
            },
        );
        assert_eq!(allocator.format(42), "000042");
        assert_eq!(allocator.format(1234567), "1234567");
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_format_and_low_numbers() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let allocator = InvoiceNumberAllocator::new(
            db.sales(),
            Arc::new(db.counters()),
            fallback_lock(),
            settings(),
        );

        assert!(allocator.validate("2500", None).await.unwrap());
        assert!(!allocator.validate("25A0", None).await.unwrap());
        assert!(!allocator.validate("123", None).await.unwrap());
        assert!(!allocator.validate("1999", None).await.unwrap());

        let err = allocator.check("12", None).await.unwrap_err();
        assert!(err.is_validation());
    }
}
