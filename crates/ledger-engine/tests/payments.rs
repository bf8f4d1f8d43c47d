//! Payment ledger, allocation and post-commit behaviour.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use ledger_core::{Money, PaymentMode, PaymentStatus, SalePaymentStatus};
use ledger_engine::{
    AllocatePaymentRequest, AllocationTarget, CommitEvent, ConflictKind, CreatePaymentRequest, LedgerEngine,
    UpdatePaymentRequest,
};

use common::*;

fn payment_for(customer_id: &str, sale_id: Option<&str>, amount: &str, mode: PaymentMode) -> CreatePaymentRequest {
    CreatePaymentRequest {
        customer_id: customer_id.to_string(),
        sale_id: sale_id.map(String::from),
        amount: dec(amount),
        mode,
        reference: None,
    }
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_cleared_payment_settles_invoice() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let outcome = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "210.00", PaymentMode::Online), USER, None)
        .await
        .unwrap();

    assert_eq!(outcome.payment.status, PaymentStatus::Cleared);
    let detail = h.engine.sales().get_sale(&sale.id).await.unwrap();
    assert_eq!(detail.sale.payment_status, SalePaymentStatus::Paid);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::zero());
}

#[tokio::test]
async fn test_idempotency_key_yields_one_payment() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let request = payment_for(&c.id, Some(&sale.id), "50.00", PaymentMode::Cash);
    let first = h.engine.payments().create(&request, USER, Some("pay-123")).await.unwrap();
    let second = h.engine.payments().create(&request, USER, Some("pay-123")).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.payment.id, second.payment.id);

    let payments = h.engine.payments().list_payments_for_sale(&sale.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(16_000));
}

#[tokio::test]
async fn test_concurrent_idempotent_creates_write_once() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let request = payment_for(&c.id, Some(&sale.id), "50.00", PaymentMode::Cash);
    let payments = h.engine.payments();
    let (a, b) = tokio::join!(
        payments.create(&request, USER, Some("pay-race")),
        payments.create(&request, USER, Some("pay-race")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.payment.id, b.payment.id);
    assert!(a.replayed != b.replayed);
    assert_eq!(payments.list_payments_for_sale(&sale.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overpayment_and_foreign_invoice_rejected() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let other = customer(&h.engine, "Other").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let err = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "300.00", PaymentMode::Cash), USER, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = h
        .engine
        .payments()
        .create(&payment_for(&other.id, Some(&sale.id), "10.00", PaymentMode::Cash), USER, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = h
        .engine
        .payments()
        .create(&payment_for(&c.id, None, "0", PaymentMode::Cash), USER, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(21_000));
}

#[tokio::test]
async fn test_on_account_payment_lowers_balance() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap();

    h.engine
        .payments()
        .create(&payment_for(&c.id, None, "25.00", PaymentMode::Cash), USER, None)
        .await
        .unwrap();

    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(18_500));

    // The invoice itself is untouched; only the net position moves
    let summary = h.engine.reconciler().ledger_summary(&c.id).await.unwrap();
    assert_eq!(summary.outstanding_invoices, Money::from_cents(21_000));
    assert_eq!(summary.net_balance, Money::from_cents(18_500));
    assert_eq!(summary.stored_balance, summary.net_balance);
}

// =============================================================================
// Status, Update, Delete
// =============================================================================

#[tokio::test]
async fn test_cheque_clears_then_voids() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let cheque = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "100.00", PaymentMode::Cheque), USER, None)
        .await
        .unwrap()
        .payment;
    assert_eq!(cheque.status, PaymentStatus::Pending);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(21_000));

    let cleared = h
        .engine
        .payments()
        .update_status(&cheque.id, PaymentStatus::Cleared, USER)
        .await
        .unwrap();
    assert_eq!(cleared.status, PaymentStatus::Cleared);
    assert_eq!(cleared.row_version, cheque.row_version + 1);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(11_000));
    let detail = h.engine.sales().get_sale(&sale.id).await.unwrap();
    assert_eq!(detail.sale.paid_amount, Money::from_cents(10_000));
    assert_eq!(detail.sale.payment_status, SalePaymentStatus::Partial);

    // Clearing twice changes nothing
    let again = h
        .engine
        .payments()
        .update_status(&cheque.id, PaymentStatus::Cleared, USER)
        .await
        .unwrap();
    assert_eq!(again.row_version, cleared.row_version);

    h.engine
        .payments()
        .update_status(&cheque.id, PaymentStatus::Void, USER)
        .await
        .unwrap();
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(21_000));
    let detail = h.engine.sales().get_sale(&sale.id).await.unwrap();
    assert_eq!(detail.sale.paid_amount, Money::zero());
}

#[tokio::test]
async fn test_paid_amount_follows_cleared_payments_after_cap() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let cheque = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "210.00", PaymentMode::Cheque), USER, None)
        .await
        .unwrap()
        .payment;
    // Pending cheques do not count, so the invoice still takes a full cash payment
    let cash = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "210.00", PaymentMode::Cash), USER, None)
        .await
        .unwrap()
        .payment;

    h.engine
        .payments()
        .update_status(&cheque.id, PaymentStatus::Cleared, USER)
        .await
        .unwrap();

    let detail = h.engine.sales().get_sale(&sale.id).await.unwrap();
    assert_eq!(detail.sale.paid_amount, Money::from_cents(21_000));
    assert_eq!(detail.sale.payment_status, SalePaymentStatus::Paid);

    let summary = h.engine.reconciler().ledger_summary(&c.id).await.unwrap();
    assert_eq!(summary.outstanding_invoices, Money::zero());
    assert_eq!(summary.net_balance, Money::from_cents(-21_000));

    h.engine
        .payments()
        .update_status(&cash.id, PaymentStatus::Void, USER)
        .await
        .unwrap();

    // The cleared cheque alone still covers the invoice
    let detail = h.engine.sales().get_sale(&sale.id).await.unwrap();
    assert_eq!(detail.sale.paid_amount, Money::from_cents(21_000));
    assert_eq!(detail.sale.payment_status, SalePaymentStatus::Paid);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::zero());

    let summary = h.engine.reconciler().ledger_summary(&c.id).await.unwrap();
    assert_eq!(summary.outstanding_invoices, Money::zero());
    assert_eq!(summary.net_balance, Money::zero());
}

#[tokio::test]
async fn test_update_retracts_then_applies() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let payment = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "50.00", PaymentMode::Cash), USER, None)
        .await
        .unwrap()
        .payment;

    let updated = h
        .engine
        .payments()
        .update(
            &payment.id,
            &UpdatePaymentRequest {
                amount: dec("80.00"),
                mode: PaymentMode::Cash,
                reference: Some("corrected".into()),
                expected_row_version: payment.row_version,
            },
            USER,
        )
        .await
        .unwrap();

    assert_eq!(updated.amount, Money::from_cents(8_000));
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(13_000));
    let detail = h.engine.sales().get_sale(&sale.id).await.unwrap();
    assert_eq!(detail.sale.paid_amount, Money::from_cents(8_000));

    // Switching to cheque re-derives the status: no longer counts
    let cheque = h
        .engine
        .payments()
        .update(
            &payment.id,
            &UpdatePaymentRequest {
                amount: dec("80.00"),
                mode: PaymentMode::Cheque,
                reference: None,
                expected_row_version: updated.row_version,
            },
            USER,
        )
        .await
        .unwrap();
    assert_eq!(cheque.status, PaymentStatus::Pending);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(21_000));

    let err = h
        .engine
        .payments()
        .update(
            &payment.id,
            &UpdatePaymentRequest {
                amount: dec("10.00"),
                mode: PaymentMode::Cash,
                reference: None,
                expected_row_version: payment.row_version,
            },
            USER,
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::RowVersion));
}

#[tokio::test]
async fn test_delete_payment_restores_balance() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let payment = h
        .engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "50.00", PaymentMode::Cash), USER, Some("k1"))
        .await
        .unwrap()
        .payment;

    h.engine.payments().delete(&payment.id, USER).await.unwrap();

    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(21_000));
    assert!(h.engine.payments().get_payment(&payment.id).await.is_err());
    assert!(h.engine.db().payments().get_idempotency("k1").await.unwrap().is_none());
}

// =============================================================================
// Allocation
// =============================================================================

#[tokio::test]
async fn test_allocate_oldest_first() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;

    let mut older = standard_sale(&p, Some(&c));
    older.invoice_date = Some(Utc::now() - ChronoDuration::days(10));
    let older = h.engine.sales().create(older, USER).await.unwrap().sale;
    let newer = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let outcome = h
        .engine
        .payments()
        .allocate(
            &AllocatePaymentRequest {
                customer_id: c.id.clone(),
                amount: dec("300.00"),
                mode: PaymentMode::Online,
                reference: None,
                allocations: vec![
                    AllocationTarget {
                        sale_id: newer.id.clone(),
                        amount: None,
                    },
                    AllocationTarget {
                        sale_id: older.id.clone(),
                        amount: None,
                    },
                    AllocationTarget {
                        sale_id: "missing".into(),
                        amount: None,
                    },
                ],
            },
            USER,
        )
        .await
        .unwrap();

    assert_eq!(outcome.payments.len(), 2);
    assert_eq!(outcome.payments[0].sale_id.as_deref(), Some(older.id.as_str()));
    assert_eq!(outcome.payments[0].amount, Money::from_cents(21_000));
    assert_eq!(outcome.payments[1].amount, Money::from_cents(9_000));
    assert_eq!(outcome.allocated, Money::from_cents(30_000));
    assert!(outcome.unallocated.is_zero());
    assert_eq!(outcome.skipped.len(), 1);

    let older = h.engine.sales().get_sale(&older.id).await.unwrap().sale;
    assert_eq!(older.payment_status, SalePaymentStatus::Paid);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(12_000));
}

#[tokio::test]
async fn test_allocate_with_nothing_payable_fails() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let cash = h.engine.sales().create(standard_sale(&p, None), USER).await.unwrap().sale;

    let err = h
        .engine
        .payments()
        .allocate(
            &AllocatePaymentRequest {
                customer_id: c.id.clone(),
                amount: dec("10.00"),
                mode: PaymentMode::Cash,
                reference: None,
                allocations: vec![AllocationTarget {
                    sale_id: cash.id.clone(),
                    amount: None,
                }],
            },
            USER,
        )
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(stored_balance(&h.engine, &c.id).await.is_zero());
}

// =============================================================================
// Post-commit
// =============================================================================

#[tokio::test]
async fn test_hooks_run_after_commit_and_failures_are_contained() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = LedgerEngine::builder(test_config())
        .post_commit_hook(Arc::new(FailingHook))
        .post_commit_hook(Arc::new(ChannelHook { tx }))
        .build()
        .await
        .unwrap();
    let p = product(&engine, "P1", 10).await;
    let c = customer(&engine, "Acme").await;

    let sale = engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        CommitEvent::SaleCreated {
            sale_id: sale.id.clone(),
            invoice_no: sale.invoice_no.clone(),
        }
    );

    engine
        .payments()
        .create(&payment_for(&c.id, Some(&sale.id), "10.00", PaymentMode::Cash), USER, None)
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, CommitEvent::PaymentRecorded { .. }));
}

#[tokio::test]
async fn test_reconciler_repairs_drift() {
    let h = harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap();

    let mut tx = h.engine.db().begin().await.unwrap();
    ledger_db::CustomerRepository::set_balance(&mut tx, &c.id, Money::from_cents(1))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let drifted = h.engine.reconciler().recompute_all().await.unwrap();
    assert_eq!(drifted.len(), 1);
    assert_eq!(drifted[0].recomputed, Money::from_cents(21_000));
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(21_000));
}
