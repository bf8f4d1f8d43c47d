//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use ledger_core::{Customer, Money, Product, Quantity};
use ledger_db::{CustomerRepository, DbError, DbResult, NewProduct, ProductRepository};
use ledger_engine::{
    Alert, AlertSink, CommitEvent, CreateSaleRequest, EngineConfig, HookError, LedgerEngine, PostCommitHook,
    SaleLineRequest, SequenceSource,
};

pub const USER: &str = "cashier-1";

/// Collects alerts so tests can assert on them.
#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn taken(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn send(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

/// Forwards every commit event to a channel.
pub struct ChannelHook {
    pub tx: mpsc::UnboundedSender<CommitEvent>,
}

#[async_trait]
impl PostCommitHook for ChannelHook {
    fn name(&self) -> &str {
        "channel"
    }

    async fn on_commit(&self, event: &CommitEvent) -> Result<(), HookError> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

pub struct FailingHook;

#[async_trait]
impl PostCommitHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_commit(&self, _event: &CommitEvent) -> Result<(), HookError> {
        Err(HookError::new("failing", "webhook endpoint returned 500"))
    }
}

/// Counter store that is always down.
pub struct OfflineCounter;

#[async_trait]
impl SequenceSource for OfflineCounter {
    async fn next_value(&self, _name: &str, _floor: u64) -> DbResult<u64> {
        Err(DbError::ConnectionFailed("counter store offline".into()))
    }
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::in_memory();
    config.invoice.fallback_jitter_ms = 0;
    config.retry.base_delay_ms = 1;
    config
}

pub struct Harness {
    pub engine: LedgerEngine,
    pub alerts: Arc<RecordingAlerts>,
}

pub async fn harness() -> Harness {
    let alerts = Arc::new(RecordingAlerts::default());
    let engine = LedgerEngine::builder(test_config())
        .alert_sink(alerts.clone())
        .build()
        .await
        .unwrap();
    Harness { engine, alerts }
}

/// Engine on a SQLite file with a multi-connection pool. Keep `dir` alive
/// for the duration of the test.
pub struct FileHarness {
    pub engine: LedgerEngine,
    pub dir: tempfile::TempDir,
}

pub async fn file_harness() -> FileHarness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.database.path = dir.path().join("ledger.db");
    config.database.max_connections = 5;

    let engine = LedgerEngine::builder(config).build().await.unwrap();
    FileHarness { engine, dir }
}

pub async fn product(engine: &LedgerEngine, sku: &str, stock_units: i64) -> Product {
    let mut tx = engine.db().begin().await.unwrap();
    let product = ProductRepository::insert(
        &mut tx,
        &NewProduct {
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            initial_stock: Quantity::from_units(stock_units),
            conversion_to_base: Quantity::ONE,
            cost_price: Money::from_cents(5_000),
            reorder_level: Quantity::zero(),
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    product
}

pub async fn customer(engine: &LedgerEngine, name: &str) -> Customer {
    let mut tx = engine.db().begin().await.unwrap();
    let customer = CustomerRepository::insert(&mut tx, name, Money::zero()).await.unwrap();
    tx.commit().await.unwrap();
    customer
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn line(product: &Product, qty: &str, price: &str) -> SaleLineRequest {
    SaleLineRequest {
        product_id: product.id.clone(),
        quantity: dec(qty),
        unit_price: dec(price),
    }
}

/// Two units at 100.00: 200.00 net + 10.00 VAT = 210.00.
pub fn standard_sale(product: &Product, customer: Option<&Customer>) -> CreateSaleRequest {
    CreateSaleRequest {
        customer_id: customer.map(|c| c.id.clone()),
        items: vec![line(product, "2", "100.00")],
        ..CreateSaleRequest::default()
    }
}

pub async fn stored_balance(engine: &LedgerEngine, customer_id: &str) -> Money {
    engine
        .db()
        .customers()
        .get_by_id(customer_id)
        .await
        .unwrap()
        .unwrap()
        .balance
}

pub async fn stock(engine: &LedgerEngine, product_id: &str) -> Quantity {
    engine
        .db()
        .products()
        .get_by_id(product_id)
        .await
        .unwrap()
        .unwrap()
        .stock_qty
}
