//! # Payment Ledger
//!
//! Records payments against customers and invoices.
//!
//! ## Payment Status Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   CASH / ONLINE ──create──► CLEARED ──update_status──► VOID             │
//! │                                ▲                                        │
//! │   CHEQUE / CREDIT ─create──► PENDING ──update_status──┘                 │
//! │                                                                         │
//! │   Only CLEARED payments count: entering CLEARED adds the amount to the │
//! │   invoice and takes it off the customer balance; leaving it reverses   │
//! │   both. Every other status change is a no-op.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency
//! A create with an idempotency key writes `payment_idempotency(key)` in the
//! same transaction as the payment. A concurrent duplicate loses on the
//! primary key, rolls back and returns the winner's stored snapshot.
//!
//! Edits retract the old effect and apply the new one rather than applying
//! a delta. After every commit the customer's balance is recomputed from
//! source rows regardless of the payment's status.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ledger_core::validation::{check_invoice_payment, check_payment_amount};
use ledger_core::{
    Money, Payment, PaymentIdempotencyRecord, PaymentMode, PaymentStatus, ValidationError,
};
use ledger_db::{
    AuditRecord, AuditRepository, CustomerRepository, Database, PaymentRepository, SaleRepository,
};

use crate::effects;
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::notify::{CommitEvent, Notifier};
use crate::reconciler::BalanceReconciler;

// =============================================================================
// Requests and Outcomes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub customer_id: String,
    /// Invoice the payment settles; `None` for an on-account payment.
    #[serde(default)]
    pub sale_id: Option<String>,
    pub amount: Decimal,
    pub mode: PaymentMode,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePaymentRequest {
    pub amount: Decimal,
    pub mode: PaymentMode,
    #[serde(default)]
    pub reference: Option<String>,
    pub expected_row_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub sale_id: String,
    /// Upper bound for this invoice; its outstanding amount when absent.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// One payment split across several invoices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatePaymentRequest {
    pub customer_id: String,
    pub amount: Decimal,
    pub mode: PaymentMode,
    #[serde(default)]
    pub reference: Option<String>,
    pub allocations: Vec<AllocationTarget>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    /// True when the idempotency key had been seen before.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAllocation {
    pub sale_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationOutcome {
    /// One payment per invoice that received money, oldest invoice first.
    pub payments: Vec<Payment>,
    pub allocated: Money,
    pub unallocated: Money,
    pub skipped: Vec<SkippedAllocation>,
}

// =============================================================================
// Payment Ledger
// =============================================================================

#[derive(Debug, Clone)]
pub struct PaymentLedger {
    db: Database,
    reconciler: BalanceReconciler,
    notifier: Notifier,
}

impl PaymentLedger {
    pub fn new(db: Database, reconciler: BalanceReconciler, notifier: Notifier) -> Self {
        PaymentLedger {
            db,
            reconciler,
            notifier,
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Records a payment.
    ///
    /// With an `idempotency_key`, repeated calls return the first call's
    /// payment and never write a second one.
    pub async fn create(
        &self,
        request: &CreatePaymentRequest,
        user: &str,
        idempotency_key: Option<&str>,
    ) -> EngineResult<PaymentOutcome> {
        if let Some(key) = idempotency_key {
            if let Some(record) = self.db.payments().get_idempotency(key).await? {
                return replay(&record);
            }
        }

        let amount = check_payment_amount("amount", request.amount)?;

        let mut tx = self.db.begin().await?;

        CustomerRepository::find(&mut tx, &request.customer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", &request.customer_id))?;

        if let Some(sale_id) = request.sale_id.as_deref() {
            let sale = SaleRepository::find(&mut tx, sale_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
            check_invoice_payment(amount, &sale, &request.customer_id).into_result()?;
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            sale_id: request.sale_id.clone(),
            customer_id: request.customer_id.clone(),
            amount,
            mode: request.mode,
            status: request.mode.initial_status(),
            reference: request.reference.clone(),
            row_version: 1,
            created_by: user.to_string(),
            created_at: now,
            updated_at: now,
        };

        PaymentRepository::insert(&mut tx, &payment).await?;
        if payment.status.is_cleared() {
            effects::apply_cleared(&mut tx, &payment).await?;
        }

        if let Some(key) = idempotency_key {
            let record = PaymentIdempotencyRecord {
                key: key.to_string(),
                payment_id: payment.id.clone(),
                snapshot: serde_json::to_string(&payment)?,
                created_at: now,
            };
            match PaymentRepository::insert_idempotency(&mut tx, &record).await {
                Ok(()) => {}
                Err(e) if e.is_unique_violation_on("payment_idempotency.key") => {
                    drop(tx);
                    debug!(key = %key, "Idempotency key won by a concurrent request");
                    let stored = self
                        .db
                        .payments()
                        .get_idempotency(key)
                        .await?
                        .ok_or_else(|| EngineError::not_found("PaymentIdempotencyRecord", key))?;
                    return replay(&stored);
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "payment.create",
                entity_type: "payment",
                entity_id: &payment.id,
                before: None,
                after: Some(summary(&payment)),
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            customer_id = %payment.customer_id,
            sale_id = ?payment.sale_id,
            amount = %payment.amount,
            mode = %payment.mode,
            status = %payment.status,
            "Payment recorded"
        );

        self.after_commit(
            &payment.customer_id,
            CommitEvent::PaymentRecorded {
                payment_id: payment.id.clone(),
                customer_id: payment.customer_id.clone(),
            },
        )
        .await;

        Ok(PaymentOutcome {
            payment,
            replayed: false,
        })
    }

    // =========================================================================
    // Status, Update, Delete
    // =========================================================================

    /// Moves a payment to `status`.
    ///
    /// Only PENDING → CLEARED and CLEARED → VOID change anything; any other
    /// request returns the payment unchanged.
    pub async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        user: &str,
    ) -> EngineResult<Payment> {
        let mut tx = self.db.begin().await?;

        let current = PaymentRepository::find(&mut tx, payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

        let mut updated = current.clone();
        updated.status = status;
        updated.row_version = current.row_version + 1;
        updated.updated_at = Utc::now();

        let clearing = match (current.status, status) {
            (PaymentStatus::Pending, PaymentStatus::Cleared) => true,
            (PaymentStatus::Cleared, PaymentStatus::Void) => false,
            (from, to) => {
                debug!(payment_id = %payment_id, %from, %to, "Status change ignored");
                return Ok(current);
            }
        };

        if !PaymentRepository::save(&mut tx, &updated, current.row_version).await? {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!("payment {} was modified concurrently", payment_id),
            ));
        }

        if clearing {
            effects::apply_cleared(&mut tx, &updated).await?;
        } else {
            effects::reverse_cleared(&mut tx, &current).await?;
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "payment.status",
                entity_type: "payment",
                entity_id: payment_id,
                before: Some(summary(&current)),
                after: Some(summary(&updated)),
            },
        )
        .await?;

        tx.commit().await?;

        info!(payment_id = %payment_id, from = %current.status, to = %status, "Payment status changed");

        self.after_commit(
            &updated.customer_id,
            CommitEvent::PaymentChanged {
                payment_id: updated.id.clone(),
                customer_id: updated.customer_id.clone(),
            },
        )
        .await;

        Ok(updated)
    }

    /// Changes amount, mode or reference.
    ///
    /// The old effect is retracted before the new one is applied. A mode
    /// change re-derives the status from the new mode.
    pub async fn update(
        &self,
        payment_id: &str,
        request: &UpdatePaymentRequest,
        user: &str,
    ) -> EngineResult<Payment> {
        let amount = check_payment_amount("amount", request.amount)?;

        let mut tx = self.db.begin().await?;

        let current = PaymentRepository::find(&mut tx, payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

        if current.row_version != request.expected_row_version {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!(
                    "payment {} changed since it was read (row version {} != {})",
                    payment_id, current.row_version, request.expected_row_version
                ),
            ));
        }
        if matches!(current.status, PaymentStatus::Void | PaymentStatus::Returned) {
            return Err(ValidationError::invalid_state(
                "Payment",
                payment_id,
                format!("is {} and cannot be edited", current.status),
            )
            .into());
        }

        if current.status.is_cleared() {
            effects::reverse_cleared(&mut tx, &current).await?;
        }

        if let Some(sale_id) = current.sale_id.as_deref() {
            let sale = SaleRepository::find(&mut tx, sale_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
            check_invoice_payment(amount, &sale, &current.customer_id).into_result()?;
        }

        let status = if request.mode == current.mode {
            current.status
        } else {
            request.mode.initial_status()
        };

        let mut updated = current.clone();
        updated.amount = amount;
        updated.mode = request.mode;
        updated.status = status;
        updated.reference = request.reference.clone();
        updated.row_version = current.row_version + 1;
        updated.updated_at = Utc::now();

        if !PaymentRepository::save(&mut tx, &updated, current.row_version).await? {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!("payment {} was modified concurrently", payment_id),
            ));
        }

        if updated.status.is_cleared() {
            effects::apply_cleared(&mut tx, &updated).await?;
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "payment.update",
                entity_type: "payment",
                entity_id: payment_id,
                before: Some(summary(&current)),
                after: Some(summary(&updated)),
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            payment_id = %payment_id,
            amount = %updated.amount,
            mode = %updated.mode,
            status = %updated.status,
            "Payment updated"
        );

        self.after_commit(
            &updated.customer_id,
            CommitEvent::PaymentChanged {
                payment_id: updated.id.clone(),
                customer_id: updated.customer_id.clone(),
            },
        )
        .await;

        Ok(updated)
    }

    /// Removes a payment and its idempotency records.
    pub async fn delete(&self, payment_id: &str, user: &str) -> EngineResult<Payment> {
        let mut tx = self.db.begin().await?;

        let payment = PaymentRepository::find(&mut tx, payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

        if payment.status.is_cleared() {
            effects::reverse_cleared(&mut tx, &payment).await?;
        }
        PaymentRepository::delete(&mut tx, payment_id).await?;

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "payment.delete",
                entity_type: "payment",
                entity_id: payment_id,
                before: Some(summary(&payment)),
                after: None,
            },
        )
        .await?;

        tx.commit().await?;

        info!(payment_id = %payment_id, amount = %payment.amount, "Payment deleted");

        self.after_commit(
            &payment.customer_id,
            CommitEvent::PaymentDeleted {
                payment_id: payment.id.clone(),
                customer_id: payment.customer_id.clone(),
            },
        )
        .await;

        Ok(payment)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Splits one payment across invoices, oldest invoice date first.
    ///
    /// ## Per Invoice
    /// ```text
    /// allocation = min(requested, payment remaining, invoice outstanding)
    /// ```
    /// Deleted, foreign, missing and fully paid invoices are skipped. Fails
    /// only when nothing could be allocated.
    pub async fn allocate(
        &self,
        request: &AllocatePaymentRequest,
        user: &str,
    ) -> EngineResult<AllocationOutcome> {
        let total = check_payment_amount("amount", request.amount)?;
        if request.allocations.is_empty() {
            return Err(ValidationError::required("allocations").into());
        }

        let mut tx = self.db.begin().await?;

        CustomerRepository::find(&mut tx, &request.customer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Customer", &request.customer_id))?;

        let mut skipped = Vec::new();
        let mut targets = Vec::with_capacity(request.allocations.len());
        for (i, target) in request.allocations.iter().enumerate() {
            match SaleRepository::find(&mut tx, &target.sale_id).await? {
                Some(sale) => targets.push((i, target, sale)),
                None => skipped.push(SkippedAllocation {
                    sale_id: target.sale_id.clone(),
                    reason: "invoice not found".to_string(),
                }),
            }
        }
        targets.sort_by(|(ia, _, a), (ib, _, b)| {
            a.invoice_date
                .cmp(&b.invoice_date)
                .then(a.created_at.cmp(&b.created_at))
                .then(ia.cmp(ib))
        });

        let now = Utc::now();
        let mut remaining = total;
        let mut payments = Vec::new();

        for (i, target, _) in targets {
            if !remaining.is_positive() {
                break;
            }

            // Re-read: an earlier allocation may have paid the same invoice
            let sale = SaleRepository::find(&mut tx, &target.sale_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Sale", &target.sale_id))?;

            let skip_reason = if sale.is_deleted {
                Some("invoice has been deleted".to_string())
            } else if sale.customer_id.as_deref() != Some(request.customer_id.as_str()) {
                Some("invoice belongs to another customer".to_string())
            } else if sale.is_fully_paid() {
                Some("invoice is already fully paid".to_string())
            } else {
                None
            };
            if let Some(reason) = skip_reason {
                skipped.push(SkippedAllocation {
                    sale_id: target.sale_id.clone(),
                    reason,
                });
                continue;
            }

            let requested = match target.amount {
                Some(amount) => match check_payment_amount(&format!("allocations[{}].amount", i), amount) {
                    Ok(money) => money,
                    Err(e) => {
                        skipped.push(SkippedAllocation {
                            sale_id: target.sale_id.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                },
                None => sale.outstanding(),
            };

            let amount = requested.min(remaining).min(sale.outstanding());
            if !amount.is_positive() {
                skipped.push(SkippedAllocation {
                    sale_id: target.sale_id.clone(),
                    reason: "nothing left to allocate".to_string(),
                });
                continue;
            }

            let payment = Payment {
                id: Uuid::new_v4().to_string(),
                sale_id: Some(sale.id.clone()),
                customer_id: request.customer_id.clone(),
                amount,
                mode: request.mode,
                status: request.mode.initial_status(),
                reference: request.reference.clone(),
                row_version: 1,
                created_by: user.to_string(),
                created_at: now,
                updated_at: now,
            };
            PaymentRepository::insert(&mut tx, &payment).await?;
            if payment.status.is_cleared() {
                effects::apply_cleared(&mut tx, &payment).await?;
            }

            debug!(sale_id = %sale.id, invoice_no = %sale.invoice_no, amount = %amount, "Allocated to invoice");
            remaining -= amount;
            payments.push(payment);
        }

        if payments.is_empty() {
            return Err(ValidationError::invalid_state(
                "Allocation",
                &request.customer_id,
                "no invoice could take any part of the payment",
            )
            .into());
        }

        let allocated = total - remaining;

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "payment.allocate",
                entity_type: "customer",
                entity_id: &request.customer_id,
                before: None,
                after: Some(format!(
                    "allocated={} across {} invoices, unallocated={}",
                    allocated,
                    payments.len(),
                    remaining
                )),
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            customer_id = %request.customer_id,
            allocated = %allocated,
            unallocated = %remaining,
            invoices = payments.len(),
            skipped = skipped.len(),
            "Payment allocated"
        );
        if remaining.is_positive() {
            warn!(customer_id = %request.customer_id, unallocated = %remaining, "Payment not fully allocated");
        }

        self.reconciler
            .reconcile_after_commit([request.customer_id.as_str()])
            .await;
        for payment in &payments {
            self.notifier.committed(CommitEvent::PaymentRecorded {
                payment_id: payment.id.clone(),
                customer_id: payment.customer_id.clone(),
            });
        }

        Ok(AllocationOutcome {
            payments,
            allocated,
            unallocated: remaining,
            skipped,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_payment(&self, payment_id: &str) -> EngineResult<Payment> {
        self.db
            .payments()
            .get_by_id(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))
    }

    pub async fn list_payments_for_sale(&self, sale_id: &str) -> EngineResult<Vec<Payment>> {
        Ok(self.db.payments().list_for_sale(sale_id).await?)
    }

    async fn after_commit(&self, customer_id: &str, event: CommitEvent) {
        self.reconciler.reconcile_after_commit([customer_id]).await;
        self.notifier.committed(event);
    }
}

fn replay(record: &PaymentIdempotencyRecord) -> EngineResult<PaymentOutcome> {
    debug!(key = %record.key, payment_id = %record.payment_id, "Replaying idempotent payment");
    let payment: Payment = serde_json::from_str(&record.snapshot)?;
    Ok(PaymentOutcome {
        payment,
        replayed: true,
    })
}

fn summary(payment: &Payment) -> String {
    format!(
        "amount={} mode={} status={} sale={}",
        payment.amount,
        payment.mode,
        payment.status,
        payment.sale_id.as_deref().unwrap_or("-")
    )
}
