//! # Alerts and Post-Commit Hooks
//!
//! Collaborators that hear about ledger writes but can never affect them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  operation ──► tx.commit() ──► reconcile ──► Notifier                   │
//! │                                                 │                       │
//! │                          ┌──────────────────────┼────────────────┐     │
//! │                          ▼                      ▼                ▼     │
//! │                    AlertSink::send       tokio::spawn       tokio::spawn│
//! │                    (sync, no I/O)        hook A (PDF)       hook B     │
//! │                                          errors → warn!     (backup)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alerts are delivered inline and must not block. Hooks run on their own
//! tasks after commit; a failing or panicking hook is logged and otherwise
//! ignored.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use ledger_core::Money;

// =============================================================================
// Alerts
// =============================================================================

/// Fire-and-forget operator notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// A client-supplied invoice number collided and was replaced.
    DuplicateInvoice {
        invoice_no: String,
        actor: String,
    },
    /// A second inline payment with the same mode was dropped.
    DuplicatePaymentEntry {
        invoice_no: String,
        mode: String,
        amount: Money,
    },
    /// An invoice was soft-deleted.
    InvoiceDeleted {
        invoice_no: String,
        actor: String,
        grand_total: Money,
    },
    /// Post-commit reconciliation of a customer failed.
    ReconciliationFailed {
        customer_id: String,
        reason: String,
    },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::DuplicateInvoice { invoice_no, actor } => {
                write!(f, "duplicate invoice number {} submitted by {}", invoice_no, actor)
            }
            Alert::DuplicatePaymentEntry {
                invoice_no,
                mode,
                amount,
            } => write!(
                f,
                "duplicate {} payment of {} ignored on invoice {}",
                mode, amount, invoice_no
            ),
            Alert::InvoiceDeleted {
                invoice_no,
                actor,
                grand_total,
            } => write!(f, "invoice {} ({}) deleted by {}", invoice_no, grand_total, actor),
            Alert::ReconciliationFailed {
                customer_id,
                reason,
            } => write!(f, "balance reconciliation failed for {}: {}", customer_id, reason),
        }
    }
}

/// Receives alerts. Implementations must return quickly.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: Alert);
}

/// Default sink: alerts become `warn!` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send(&self, alert: Alert) {
        warn!(alert = %alert, "Ledger alert");
    }
}

// =============================================================================
// Post-Commit Hooks
// =============================================================================

/// What was just committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CommitEvent {
    SaleCreated {
        sale_id: String,
        invoice_no: String,
    },
    SaleUpdated {
        sale_id: String,
        invoice_no: String,
        version: i64,
    },
    SaleDeleted {
        sale_id: String,
        invoice_no: String,
    },
    PaymentRecorded {
        payment_id: String,
        customer_id: String,
    },
    PaymentChanged {
        payment_id: String,
        customer_id: String,
    },
    PaymentDeleted {
        payment_id: String,
        customer_id: String,
    },
}

#[derive(Debug, Error)]
#[error("{hook} hook failed: {message}")]
pub struct HookError {
    pub hook: String,
    pub message: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        HookError {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Best-effort work run after a successful commit (PDF, backup, ...).
#[async_trait]
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_commit(&self, event: &CommitEvent) -> Result<(), HookError>;
}

// =============================================================================
// Notifier
// =============================================================================

/// Fan-out point shared by the sale and payment managers.
#[derive(Clone)]
pub struct Notifier {
    alerts: Arc<dyn AlertSink>,
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl Notifier {
    pub fn new(alerts: Arc<dyn AlertSink>, hooks: Vec<Arc<dyn PostCommitHook>>) -> Self {
        Notifier { alerts, hooks }
    }

    pub fn alert(&self, alert: Alert) {
        self.alerts.send(alert);
    }

    /// Spawns every hook for `event`. Never waits for them.
    pub fn committed(&self, event: CommitEvent) {
        if self.hooks.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                match hook.on_commit(&event).await {
                    Ok(()) => debug!(hook = %hook.name(), "Post-commit hook finished"),
                    Err(e) => warn!(error = %e, "Post-commit hook failed"),
                }
            });
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new(Arc::new(TracingAlertSink), Vec::new())
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct Recording(Mutex<Vec<Alert>>);

    impl AlertSink for Recording {
        fn send(&self, alert: Alert) {
            self.0.lock().unwrap().push(alert);
        }
    }

    struct Forward(mpsc::UnboundedSender<CommitEvent>);

    #[async_trait]
    impl PostCommitHook for Forward {
        fn name(&self) -> &str {
            "forward"
        }

        async fn on_commit(&self, event: &CommitEvent) -> Result<(), HookError> {
            self.0
                .send(event.clone())
                .map_err(|e| HookError::new("forward", e.to_string()))
        }
    }

    struct Broken;

    #[async_trait]
    impl PostCommitHook for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn on_commit(&self, _event: &CommitEvent) -> Result<(), HookError> {
            Err(HookError::new("broken", "disk full"))
        }
    }

    #[test]
    fn test_alert_display() {
        let alert = Alert::InvoiceDeleted {
            invoice_no: "2001".into(),
            actor: "u1".into(),
            grand_total: Money::from_cents(21_000),
        };
        assert_eq!(alert.to_string(), "invoice 2001 (210.00) deleted by u1");
    }

    #[tokio::test]
    async fn test_hooks_run_after_broken_sibling() {
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(
            sink.clone(),
            vec![Arc::new(Broken), Arc::new(Forward(tx))],
        );

        notifier.alert(Alert::DuplicateInvoice {
            invoice_no: "2001".into(),
            actor: "u1".into(),
        });
        notifier.committed(CommitEvent::SaleCreated {
            sale_id: "s1".into(),
            invoice_no: "2001".into(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CommitEvent::SaleCreated { .. }));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
