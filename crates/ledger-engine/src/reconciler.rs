//! # Balance Reconciler
//!
//! Recomputes customer balances from source rows.
//!
//! ```text
//! balance = Σ grand_total (non-deleted sales) − Σ amount (CLEARED payments)
//! ```
//!
//! Sale and payment operations adjust the stored balance inline as they go.
//! After every commit they call [`BalanceReconciler::reconcile_after_commit`],
//! which rewrites the stored value from the formula above. Any difference
//! between the two is logged as drift.

use serde::Serialize;
use tracing::{error, info, warn};

use ledger_core::Money;
use ledger_db::{CustomerRepository, Database};

use crate::error::{EngineError, EngineResult};
use crate::notify::{Alert, Notifier};

/// Outcome of recomputing one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub customer_id: String,
    pub previous: Money,
    pub recomputed: Money,
    /// `recomputed − previous`; zero when the inline adjustments were right.
    pub drift: Money,
}

impl Reconciliation {
    pub fn drifted(&self) -> bool {
        !self.drift.is_zero()
    }
}

/// Both ledger figures for a customer, never merged into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub customer_id: String,
    /// Balance column as stored.
    pub stored_balance: Money,
    /// Σ grand_total − Σ cleared payments.
    pub net_balance: Money,
    /// Σ per live invoice of `grand_total − paid_amount`.
    pub outstanding_invoices: Money,
}

#[derive(Debug, Clone)]
pub struct BalanceReconciler {
    db: Database,
    notifier: Notifier,
}

impl BalanceReconciler {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        BalanceReconciler { db, notifier }
    }

    /// Rewrites the customer's balance from source rows.
    pub async fn recompute(&self, customer_id: &str) -> EngineResult<Reconciliation> {
        let mut tx = self.db.begin().await?;

        let customer = CustomerRepository::find(&mut tx, customer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;
        let recomputed = CustomerRepository::computed_balance(&mut tx, customer_id).await?;

        let reconciliation = Reconciliation {
            customer_id: customer_id.to_string(),
            previous: customer.balance,
            recomputed,
            drift: recomputed - customer.balance,
        };

        if reconciliation.drifted() {
            CustomerRepository::set_balance(&mut tx, customer_id, recomputed).await?;
            tx.commit().await?;
            warn!(
                customer_id = %customer_id,
                previous = %reconciliation.previous,
                recomputed = %recomputed,
                drift = %reconciliation.drift,
                "Customer balance drift corrected"
            );
        }

        Ok(reconciliation)
    }

    /// Recomputes every customer; returns only those that drifted.
    pub async fn recompute_all(&self) -> EngineResult<Vec<Reconciliation>> {
        let ids = self.db.customers().list_ids().await?;
        let mut drifted = Vec::new();

        for id in &ids {
            let reconciliation = self.recompute(id).await?;
            if reconciliation.drifted() {
                drifted.push(reconciliation);
            }
        }

        info!(customers = ids.len(), drifted = drifted.len(), "Full reconciliation finished");
        Ok(drifted)
    }

    pub async fn ledger_summary(&self, customer_id: &str) -> EngineResult<LedgerSummary> {
        let mut tx = self.db.begin_read().await?;

        let customer = CustomerRepository::find(&mut tx, customer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))?;
        let net_balance = CustomerRepository::computed_balance(&mut tx, customer_id).await?;
        let outstanding_invoices = CustomerRepository::outstanding_invoices(&mut tx, customer_id).await?;

        Ok(LedgerSummary {
            customer_id: customer_id.to_string(),
            stored_balance: customer.balance,
            net_balance,
            outstanding_invoices,
        })
    }

    /// Post-commit backstop. Failures are alerted and logged, never returned.
    pub(crate) async fn reconcile_after_commit<'a, I>(&self, customer_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen: Vec<&str> = Vec::new();
        for id in customer_ids {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);

            if let Err(e) = self.recompute(id).await {
                error!(customer_id = %id, error = %e, "Post-commit reconciliation failed");
                self.notifier.alert(Alert::ReconciliationFailed {
                    customer_id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_db::DbConfig;

    #[tokio::test]
    async fn test_recompute_corrects_drift() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let customer = CustomerRepository::insert(&mut tx, "Acme", Money::zero()).await.unwrap();
        CustomerRepository::adjust_balance(&mut tx, &customer.id, Money::from_cents(999))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let reconciler = BalanceReconciler::new(db.clone(), Notifier::default());
        let result = reconciler.recompute(&customer.id).await.unwrap();
        assert_eq!(result.drift, Money::from_cents(-999));
        assert!(result.recomputed.is_zero());

        let again = reconciler.recompute(&customer.id).await.unwrap();
        assert!(!again.drifted());

        let drifted = reconciler.recompute_all().await.unwrap();
        assert!(drifted.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let reconciler = BalanceReconciler::new(db, Notifier::default());
        let err = reconciler.recompute("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
