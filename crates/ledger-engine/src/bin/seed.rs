//! # Seed Data Generator
//!
//! Fills a fresh ledger database with demo products and customers.
//!
//! ## Usage
//! ```bash
//! # Database from the default config file / LEDGER_* variables
//! cargo run -p ledger-engine --bin ledger-seed
//!
//! # Explicit config file
//! cargo run -p ledger-engine --bin ledger-seed -- --config ./ledger.toml
//!
//! # Explicit database path
//! cargo run -p ledger-engine --bin ledger-seed -- --db ./data/ledger.db
//! ```
//!
//! Each product gets an opening stock plus one Purchase movement, so the
//! inventory ledger is non-empty from the start.

use std::env;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ledger_core::{InventoryKind, Money, Quantity};
use ledger_db::{CustomerRepository, NewProduct, ProductRepository};
use ledger_engine::{EngineConfig, LedgerEngine};

/// (sku, name, unit cost in cents, opening stock, purchased, units per pack)
const PRODUCTS: &[(&str, &str, i64, i64, i64, i64)] = &[
    ("BEV-001", "Mineral Water 500ml", 4_500, 40, 60, 1),
    ("BEV-002", "Orange Juice 1L", 18_000, 20, 30, 1),
    ("BEV-003", "Soda Can 6-Pack", 52_000, 10, 15, 6),
    ("SNK-001", "Salted Crisps", 9_000, 50, 50, 1),
    ("SNK-002", "Chocolate Bar", 12_500, 30, 70, 1),
    ("GRO-001", "Basmati Rice 5kg", 145_000, 8, 12, 1),
    ("GRO-002", "Cooking Oil 3L", 98_000, 6, 10, 1),
    ("DRY-001", "Milk Powder 400g", 64_000, 12, 24, 1),
];

/// (name, credit limit in cents; 0 = unlimited)
const CUSTOMERS: &[(&str, i64)] = &[
    ("Corner Store", 5_000_000),
    ("City Cafe", 2_500_000),
    ("Hotel Palms", 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Sales Ledger Seed Data Generator");
                println!();
                println!("Usage: ledger-seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = EngineConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    let engine = LedgerEngine::open(config).await?;
    let db = engine.db();

    let existing = db.products().list(1).await?;
    if !existing.is_empty() {
        warn!("Database already has products, skipping seed");
        return Ok(());
    }

    let mut tx = db.begin().await?;

    for &(sku, name, cost, opening, purchased, pack) in PRODUCTS {
        let product = ProductRepository::insert(
            &mut tx,
            &NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                initial_stock: Quantity::from_units(opening),
                conversion_to_base: Quantity::from_units(pack),
                cost_price: Money::from_cents(cost),
                reorder_level: Quantity::from_units(5),
            },
        )
        .await?;

        ProductRepository::apply_stock_change(
            &mut tx,
            &product.id,
            Quantity::from_units(purchased),
            InventoryKind::Purchase,
            None,
        )
        .await?;

        info!(sku = %sku, id = %product.id, stock = opening + purchased, "Seeded product");
    }

    for &(name, limit) in CUSTOMERS {
        let customer = CustomerRepository::insert(&mut tx, name, Money::from_cents(limit)).await?;
        info!(name = %name, id = %customer.id, "Seeded customer");
    }

    tx.commit().await?;

    info!(
        products = PRODUCTS.len(),
        customers = CUSTOMERS.len(),
        "Seed complete"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
