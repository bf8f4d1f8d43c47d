//! Concurrent writers against a SQLite file with several pool connections.

mod common;

use std::collections::HashSet;

use ledger_core::{Money, PaymentMode};
use ledger_engine::{ConflictKind, CreatePaymentRequest, UpdateSaleRequest};

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_creates_all_commit_with_distinct_numbers() {
    let h = file_harness().await;
    let p = product(&h.engine, "P1", 100).await;
    let c = customer(&h.engine, "Acme").await;

    let mut numbers = HashSet::new();
    for _ in 0..10 {
        let (a, b) = (h.engine.clone(), h.engine.clone());
        let (request_a, request_b) = (standard_sale(&p, Some(&c)), standard_sale(&p, Some(&c)));
        let (first, second) = tokio::join!(
            tokio::spawn(async move { a.sales().create(request_a, USER).await }),
            tokio::spawn(async move { b.sales().create(request_b, USER).await }),
        );

        for outcome in [first.unwrap(), second.unwrap()] {
            let outcome = outcome.unwrap();
            assert!(numbers.insert(outcome.sale.invoice_no));
        }
    }

    assert_eq!(numbers.len(), 20);
    let expected: HashSet<String> = (2000..2020).map(|n| n.to_string()).collect();
    assert_eq!(numbers, expected);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(20 * 21_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_updates_lose_on_row_version() {
    let h = file_harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let sale = h.engine.sales().create(standard_sale(&p, None), USER).await.unwrap().sale;

    let edit = |qty: &str| UpdateSaleRequest {
        items: vec![line(&p, qty, "100.00")],
        ..UpdateSaleRequest::default()
    };
    let (a, b) = (h.engine.clone(), h.engine.clone());
    let (request_a, request_b) = (edit("1"), edit("3"));
    let (id_a, id_b) = (sale.id.clone(), sale.id.clone());
    let expected = sale.row_version;

    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.sales().update(&id_a, &request_a, USER, "a", expected).await }),
        tokio::spawn(async move { b.sales().update(&id_b, &request_b, USER, "b", expected).await }),
    );
    let results = [first.unwrap(), second.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.conflict_kind() == Some(ConflictKind::RowVersion)))
            .count(),
        1
    );
    assert_eq!(h.engine.sales().list_versions(&sale.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_idempotent_payments_write_once() {
    let h = file_harness().await;
    let p = product(&h.engine, "P1", 10).await;
    let c = customer(&h.engine, "Acme").await;
    let sale = h.engine.sales().create(standard_sale(&p, Some(&c)), USER).await.unwrap().sale;

    let request = CreatePaymentRequest {
        customer_id: c.id.clone(),
        sale_id: Some(sale.id.clone()),
        amount: dec("50.00"),
        mode: PaymentMode::Cash,
        reference: None,
    };
    let (a, b) = (h.engine.clone(), h.engine.clone());
    let (request_a, request_b) = (request.clone(), request);

    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.payments().create(&request_a, USER, Some("pay-file")).await }),
        tokio::spawn(async move { b.payments().create(&request_b, USER, Some("pay-file")).await }),
    );
    let (first, second) = (first.unwrap().unwrap(), second.unwrap().unwrap());

    assert_eq!(first.payment.id, second.payment.id);
    assert!(first.replayed != second.replayed);
    assert_eq!(h.engine.payments().list_payments_for_sale(&sale.id).await.unwrap().len(), 1);
    assert_eq!(stored_balance(&h.engine, &c.id).await, Money::from_cents(16_000));
}
