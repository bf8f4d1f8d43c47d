//! # Sale Transaction Manager
//!
//! Creates, edits and soft-deletes invoices. Every operation is one SQLite
//! transaction that moves the sale, its lines, product stock, inventory
//! rows, linked payments and customer balances together.
//!
//! ## Invoice State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   (nothing) ──create──► FINALIZED ──update──► EDITED ──update──┐        │
//! │                             │                   │  ▲            │        │
//! │                             │                   │  └────────────┘        │
//! │                             └──────delete───────┴──────► DELETED         │
//! │                                                          (terminal)      │
//! │                                                                         │
//! │   create   stock −base per line (Sale rows), totals, inline payments    │
//! │   update   snapshot old state, stock +old (Adjustment) −new (Sale),     │
//! │            version + 1                                                  │
//! │   delete   stock +old (Adjustment), payments VOID, paid = 0             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Create Retry
//! ```text
//! attempt ──► Conflict(InvoiceNumber)? ──yes──► drop client number,
//!    ▲                  │                        sleep 50ms·2ⁿ ──┐
//!    │                  no                                        │
//!    │                  ▼                                         │
//!    │            return result                                   │
//!    └────────────────────────────────────────────────────────────┘
//! ```
//!
//! After commit the touched customers are reconciled and post-commit hooks
//! are spawned. Neither can change the outcome of the operation.

use std::sync::Arc;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ledger_core::validation::{
    check_discount, check_payment_amount, check_quantity, check_stock, check_unit_price,
};
use ledger_core::{
    line_amounts, settle, InventoryKind, InvoiceTotals, InvoiceVersionSnapshot, LineAmounts, Money,
    Payment, PaymentMode, PaymentStatus, Product, Quantity, Sale, SaleItem, SalePaymentStatus,
    SaleSnapshot, TaxRate, ValidationError, ValidationReport, CENT_TOLERANCE,
};
use ledger_db::{
    AuditRecord, AuditRepository, CustomerRepository, Database, PaymentRepository,
    ProductRepository, SaleRepository,
};

use crate::allocator::InvoiceNumberAllocator;
use crate::config::EngineConfig;
use crate::effects;
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::notify::{Alert, CommitEvent, Notifier};
use crate::reconciler::BalanceReconciler;

// =============================================================================
// Requests and Outcomes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLineRequest {
    pub product_id: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Payment taken together with the invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlinePayment {
    pub amount: Decimal,
    pub mode: PaymentMode,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSaleRequest {
    /// Client-chosen number; allocated when absent.
    #[serde(default)]
    pub invoice_no: Option<String>,
    /// `None` for a cash customer.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Makes Create idempotent: a live sale with this reference is returned
    /// instead of creating another.
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<DateTime<Utc>>,
    pub items: Vec<SaleLineRequest>,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub payments: Vec<InlinePayment>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Full replacement of an invoice's editable state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSaleRequest {
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Keeps the current date when absent.
    #[serde(default)]
    pub invoice_date: Option<DateTime<Utc>>,
    pub items: Vec<SaleLineRequest>,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleOutcome {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub payments: Vec<Payment>,
    pub warnings: Vec<String>,
    /// True when an earlier sale with the same external reference was
    /// returned unchanged.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleDetail {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub payments: Vec<Payment>,
}

// =============================================================================
// Line Pricing
// =============================================================================

struct PricedLine {
    product_id: String,
    quantity: Quantity,
    unit_price: Money,
    base_quantity: Quantity,
    amounts: LineAmounts,
}

impl PricedLine {
    fn to_item(&self, sale_id: &str, now: DateTime<Utc>) -> SaleItem {
        SaleItem {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.to_string(),
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            base_quantity: self.base_quantity,
            vat_amount: self.amounts.vat,
            line_total: self.amounts.line_total,
            created_at: now,
        }
    }
}

struct PricedInvoice {
    lines: Vec<PricedLine>,
    totals: InvoiceTotals,
    warnings: Vec<String>,
}

/// Validates and prices `items` inside the transaction.
///
/// `released` holds base quantities per product that the operation gives
/// back first, so an edit is checked against stock as if its old lines
/// never existed.
async fn price_invoice(
    conn: &mut SqliteConnection,
    items: &[SaleLineRequest],
    discount: Decimal,
    rate: TaxRate,
    released: &[(String, Quantity)],
) -> EngineResult<PricedInvoice> {
    if items.is_empty() {
        return Err(ValidationError::required("items").into());
    }

    let mut report = ValidationReport::new();
    let mut lines = Vec::with_capacity(items.len());
    let mut demand: Vec<(Product, Quantity)> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let quantity = report.record(check_quantity(&format!("items[{}].quantity", i), item.quantity));
        let unit_price =
            report.record(check_unit_price(&format!("items[{}].unit_price", i), item.unit_price));

        let product = ProductRepository::find(conn, &item.product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", &item.product_id))?;

        let (Some(quantity), Some(unit_price)) = (quantity, unit_price) else {
            continue;
        };

        let base_quantity = quantity.to_base(product.conversion_to_base);
        match demand.iter_mut().find(|(p, _)| p.id == product.id) {
            Some((_, total)) => *total += base_quantity,
            None => demand.push((product, base_quantity)),
        }

        lines.push(PricedLine {
            product_id: item.product_id.clone(),
            quantity,
            unit_price,
            base_quantity,
            amounts: line_amounts(quantity, unit_price, rate),
        });
    }

    for (product, required) in &demand {
        let released_qty = released
            .iter()
            .filter(|(id, _)| *id == product.id)
            .map(|(_, q)| *q)
            .sum();
        report.merge(check_stock(&product.name, *required, product.stock_qty, released_qty));
    }

    let gross = InvoiceTotals::from_lines(lines.iter().map(|l| &l.amounts), Money::zero()).gross();
    let discount = report.record(check_discount(discount, gross));

    let warnings = report.into_result()?;
    let totals = InvoiceTotals::from_lines(
        lines.iter().map(|l| &l.amounts),
        discount.unwrap_or_default(),
    );

    Ok(PricedInvoice {
        lines,
        totals,
        warnings,
    })
}

fn released_quantities(items: &[SaleItem]) -> Vec<(String, Quantity)> {
    items
        .iter()
        .map(|item| (item.product_id.clone(), item.base_quantity))
        .collect()
}

fn summary(sale: &Sale) -> String {
    format!(
        "invoice={} v{} customer={} grand_total={} paid={} status={}",
        sale.invoice_no,
        sale.version,
        sale.customer_id.as_deref().unwrap_or("cash"),
        sale.grand_total,
        sale.paid_amount,
        sale.payment_status
    )
}

fn diff_summary(old: &Sale, old_items: &[SaleItem], new: &Sale, new_items: &[SaleItem]) -> String {
    let mut changes = Vec::new();
    if old.customer_id != new.customer_id {
        changes.push(format!(
            "customer {} -> {}",
            old.customer_id.as_deref().unwrap_or("cash"),
            new.customer_id.as_deref().unwrap_or("cash")
        ));
    }
    if old_items.len() != new_items.len() {
        changes.push(format!("lines {} -> {}", old_items.len(), new_items.len()));
    }
    if old.discount != new.discount {
        changes.push(format!("discount {} -> {}", old.discount, new.discount));
    }
    if old.grand_total != new.grand_total {
        changes.push(format!("grand_total {} -> {}", old.grand_total, new.grand_total));
    }
    if old.invoice_date != new.invoice_date {
        changes.push(format!(
            "date {} -> {}",
            old.invoice_date.date_naive(),
            new.invoice_date.date_naive()
        ));
    }
    if changes.is_empty() {
        "no header changes".to_string()
    } else {
        changes.join("; ")
    }
}

async fn credit_limit_warning(
    conn: &mut SqliteConnection,
    customer_id: &str,
) -> EngineResult<Option<String>> {
    let Some(customer) = CustomerRepository::find(conn, customer_id).await? else {
        return Ok(None);
    };
    if customer.exceeds_credit_limit(customer.balance) {
        return Ok(Some(format!(
            "Customer {} balance {} exceeds credit limit {}",
            customer.name, customer.balance, customer.credit_limit
        )));
    }
    Ok(None)
}

// =============================================================================
// Sale Transaction Manager
// =============================================================================

#[derive(Debug, Clone)]
pub struct SaleTransactionManager {
    db: Database,
    allocator: InvoiceNumberAllocator,
    reconciler: BalanceReconciler,
    notifier: Notifier,
    config: Arc<EngineConfig>,
}

impl SaleTransactionManager {
    pub fn new(
        db: Database,
        allocator: InvoiceNumberAllocator,
        reconciler: BalanceReconciler,
        notifier: Notifier,
        config: Arc<EngineConfig>,
    ) -> Self {
        SaleTransactionManager {
            db,
            allocator,
            reconciler,
            notifier,
            config,
        }
    }

    fn default_rate(&self) -> TaxRate {
        self.config.default_tax_rate().unwrap_or_default()
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates a finalized invoice.
    ///
    /// A duplicate invoice number is retried with exponential backoff; the
    /// client-supplied number is dropped on the first collision so a fresh
    /// one is allocated. Every other error returns immediately.
    pub async fn create(&self, request: CreateSaleRequest, user: &str) -> EngineResult<SaleOutcome> {
        let retry = &self.config.retry;
        let mut backoff = ExponentialBackoff {
            current_interval: retry.base_delay(),
            initial_interval: retry.base_delay(),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: retry.base_delay() * 64,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut invoice_no = request.invoice_no.clone();
        let mut carried = Vec::new();
        let mut attempt = 1;

        loop {
            match self.create_once(&request, invoice_no.as_deref(), user).await {
                Ok(mut outcome) => {
                    carried.append(&mut outcome.warnings);
                    outcome.warnings = carried;
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable_invoice_conflict() && attempt < retry.max_attempts => {
                    if let Some(taken) = invoice_no.take() {
                        warn!(invoice_no = %taken, user = %user, "Duplicate invoice number submitted");
                        self.notifier.alert(Alert::DuplicateInvoice {
                            invoice_no: taken.clone(),
                            actor: user.to_string(),
                        });
                        carried.push(format!(
                            "Invoice number {} was already in use; a new number was assigned",
                            taken
                        ));
                    } else {
                        // The counter lags numbers issued elsewhere
                        self.allocator.resync().await?;
                    }

                    let delay = backoff.next_backoff().unwrap_or_else(|| retry.base_delay());
                    debug!(attempt, ?delay, error = %e, "Retrying sale creation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn create_once(
        &self,
        request: &CreateSaleRequest,
        invoice_no: Option<&str>,
        user: &str,
    ) -> EngineResult<SaleOutcome> {
        if let Some(external_ref) = request.external_ref.as_deref() {
            if let Some(existing) = self.db.sales().get_by_external_ref(external_ref).await? {
                return self.replay(existing).await;
            }
        }

        // Number first, outside the transaction
        let invoice_no = match invoice_no {
            Some(no) => {
                self.allocator.check(no, None).await?;
                no.to_string()
            }
            None => self.allocator.next().await?,
        };

        let mut tx = self.db.begin().await?;

        if let Some(external_ref) = request.external_ref.as_deref() {
            if let Some(existing) = SaleRepository::find_by_external_ref(&mut tx, external_ref).await? {
                drop(tx);
                return self.replay(existing).await;
            }
        }

        if SaleRepository::invoice_no_in_use(&mut tx, &invoice_no, None).await? {
            return Err(EngineError::conflict(
                ConflictKind::InvoiceNumber,
                format!("invoice number {} is already in use", invoice_no),
            ));
        }

        let customer = match request.customer_id.as_deref() {
            Some(id) => Some(
                CustomerRepository::find(&mut tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Customer", id))?,
            ),
            None => None,
        };

        let rate = effects::vat_rate(&mut tx, self.default_rate()).await?;
        let priced = price_invoice(&mut tx, &request.items, request.discount, rate, &[]).await?;
        let totals = priced.totals;
        let mut warnings = priced.warnings;
        let mut alerts = Vec::new();

        let sale_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        // Inline payments
        let mut payments = Vec::new();
        let mut cleared = Money::zero();
        match &customer {
            None => {
                if !request.payments.is_empty() {
                    warnings.push("Inline payments ignored: cash sale is settled in full".to_string());
                }
            }
            Some(customer) => {
                let mut report = ValidationReport::new();
                let mut seen_modes: Vec<PaymentMode> = Vec::new();
                let mut remaining = totals.grand_total;

                for (i, inline) in request.payments.iter().enumerate() {
                    let field = format!("payments[{}].amount", i);
                    let Some(amount) = report.record(check_payment_amount(&field, inline.amount)) else {
                        continue;
                    };

                    if seen_modes.contains(&inline.mode) {
                        warnings.push(format!(
                            "Duplicate {} payment of {} ignored",
                            inline.mode, amount
                        ));
                        alerts.push(Alert::DuplicatePaymentEntry {
                            invoice_no: invoice_no.clone(),
                            mode: inline.mode.to_string(),
                            amount,
                        });
                        continue;
                    }
                    seen_modes.push(inline.mode);

                    if amount > remaining + CENT_TOLERANCE {
                        report.error(ValidationError::ExceedsOutstanding {
                            invoice_no: invoice_no.clone(),
                            amount: amount.to_string(),
                            outstanding: remaining.to_string(),
                        });
                        continue;
                    }
                    remaining = (remaining - amount).non_negative();

                    let payment = Payment {
                        id: Uuid::new_v4().to_string(),
                        sale_id: Some(sale_id.clone()),
                        customer_id: customer.id.clone(),
                        amount,
                        mode: inline.mode,
                        status: inline.mode.initial_status(),
                        reference: inline.reference.clone(),
                        row_version: 1,
                        created_by: user.to_string(),
                        created_at: now,
                        updated_at: now,
                    };
                    cleared += payment.effective_amount();
                    payments.push(payment);
                }

                report.into_result()?;
            }
        }

        let (paid_amount, payment_status) = match &customer {
            None => (totals.grand_total, SalePaymentStatus::Paid),
            Some(_) => {
                let settlement = settle(cleared, totals.grand_total);
                (settlement.paid_amount, settlement.status)
            }
        };

        let sale = Sale {
            id: sale_id.clone(),
            invoice_no: invoice_no.clone(),
            customer_id: customer.as_ref().map(|c| c.id.clone()),
            external_ref: request.external_ref.clone(),
            invoice_date: request.invoice_date.unwrap_or(now),
            subtotal: totals.subtotal,
            vat_total: totals.vat_total,
            discount: totals.discount,
            grand_total: totals.grand_total,
            paid_amount,
            payment_status,
            version: 1,
            is_deleted: false,
            is_locked: false,
            row_version: 1,
            notes: request.notes.clone(),
            created_by: user.to_string(),
            last_modified_by: user.to_string(),
            last_modified_at: now,
            deleted_by: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        SaleRepository::insert(&mut tx, &sale).await?;

        let mut items = Vec::with_capacity(priced.lines.len());
        for line in &priced.lines {
            let item = line.to_item(&sale_id, now);
            SaleRepository::insert_item(&mut tx, &item).await?;
            ProductRepository::apply_stock_change(
                &mut tx,
                &line.product_id,
                -line.base_quantity,
                InventoryKind::Sale,
                Some(&sale_id),
            )
            .await?;
            items.push(item);
        }

        for payment in &payments {
            PaymentRepository::insert(&mut tx, payment).await?;
        }

        if let Some(customer) = &customer {
            CustomerRepository::adjust_balance(&mut tx, &customer.id, totals.grand_total - cleared)
                .await?;
            if let Some(warning) = credit_limit_warning(&mut tx, &customer.id).await? {
                warnings.push(warning);
            }
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "sale.create",
                entity_type: "sale",
                entity_id: &sale_id,
                before: None,
                after: Some(summary(&sale)),
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            invoice_no = %sale.invoice_no,
            grand_total = %sale.grand_total,
            status = %sale.payment_status,
            lines = items.len(),
            "Sale created"
        );

        for alert in alerts {
            self.notifier.alert(alert);
        }
        self.reconciler
            .reconcile_after_commit(sale.customer_id.as_deref())
            .await;
        self.notifier.committed(CommitEvent::SaleCreated {
            sale_id: sale.id.clone(),
            invoice_no: sale.invoice_no.clone(),
        });

        Ok(SaleOutcome {
            sale,
            items,
            payments,
            warnings,
            replayed: false,
        })
    }

    async fn replay(&self, existing: Sale) -> EngineResult<SaleOutcome> {
        debug!(sale_id = %existing.id, invoice_no = %existing.invoice_no, "External reference already recorded");
        let items = self.db.sales().get_items(&existing.id).await?;
        let payments = self.db.payments().list_for_sale(&existing.id).await?;
        Ok(SaleOutcome {
            sale: existing,
            items,
            payments,
            warnings: Vec::new(),
            replayed: true,
        })
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Replaces an invoice's lines and header fields.
    ///
    /// ## Guards (in order)
    /// 1. Deleted or locked invoices cannot be edited
    /// 2. A different user touched it within the collision window
    /// 3. `expected_row_version` is stale
    pub async fn update(
        &self,
        sale_id: &str,
        request: &UpdateSaleRequest,
        user: &str,
        edit_reason: &str,
        expected_row_version: i64,
    ) -> EngineResult<SaleOutcome> {
        let mut tx = self.db.begin().await?;

        let old = SaleRepository::find(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

        if old.is_deleted {
            return Err(ValidationError::invalid_state("Invoice", &old.invoice_no, "has been deleted").into());
        }
        if old.is_locked {
            return Err(ValidationError::invalid_state("Invoice", &old.invoice_no, "is locked").into());
        }

        let now = Utc::now();
        if old.last_modified_by != user && now - old.last_modified_at < self.config.edit_collision_window() {
            return Err(EngineError::conflict(
                ConflictKind::EditInProgress,
                format!(
                    "invoice {} is being edited by {}; try again shortly",
                    old.invoice_no, old.last_modified_by
                ),
            ));
        }
        if old.row_version != expected_row_version {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!(
                    "invoice {} changed since it was read (row version {} != {})",
                    old.invoice_no, old.row_version, expected_row_version
                ),
            ));
        }

        let old_items = SaleRepository::find_items(&mut tx, sale_id).await?;

        let new_customer = match request.customer_id.as_deref() {
            Some(id) => Some(
                CustomerRepository::find(&mut tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Customer", id))?,
            ),
            None => None,
        };
        let new_customer_id = new_customer.as_ref().map(|c| c.id.clone());

        let rate = effects::vat_rate(&mut tx, self.default_rate()).await?;
        let priced = price_invoice(
            &mut tx,
            &request.items,
            request.discount,
            rate,
            &released_quantities(&old_items),
        )
        .await?;
        let totals = priced.totals;
        let mut warnings = priced.warnings;

        let payments = PaymentRepository::find_for_sale(&mut tx, sale_id).await?;
        let cleared = PaymentRepository::cleared_total_for_sale(&mut tx, sale_id, None).await?;

        let paid_basis = match (&old.customer_id, &new_customer_id) {
            (Some(_), None) => {
                if payments.iter().any(|p| p.status != PaymentStatus::Void) {
                    return Err(ValidationError::invalid_state(
                        "Invoice",
                        &old.invoice_no,
                        "has linked payments and cannot become a cash sale",
                    )
                    .into());
                }
                totals.grand_total
            }
            (None, None) => totals.grand_total,
            (_, Some(_)) => cleared,
        };

        let settlement = settle(paid_basis, totals.grand_total);
        if settlement.excess.is_positive() {
            warnings.push(format!(
                "Paid amount exceeds the new total by {}; the excess is credited to the customer",
                settlement.excess
            ));
        }

        // Snapshot of the pre-edit state
        let snapshot_json = SaleSnapshot {
            sale: old.clone(),
            items: old_items.clone(),
        }
        .to_json()?;

        let mut sale = old.clone();
        sale.customer_id = new_customer_id.clone();
        sale.invoice_date = request.invoice_date.unwrap_or(old.invoice_date);
        sale.subtotal = totals.subtotal;
        sale.vat_total = totals.vat_total;
        sale.discount = totals.discount;
        sale.grand_total = totals.grand_total;
        sale.paid_amount = settlement.paid_amount;
        sale.payment_status = settlement.status;
        sale.notes = request.notes.clone();
        sale.version = old.version + 1;
        sale.row_version = old.row_version + 1;
        sale.last_modified_by = user.to_string();
        sale.last_modified_at = now;
        sale.updated_at = now;

        // Stock: give back the old lines, take the new ones
        for item in &old_items {
            ProductRepository::apply_stock_change(
                &mut tx,
                &item.product_id,
                item.base_quantity,
                InventoryKind::Adjustment,
                Some(sale_id),
            )
            .await?;
        }
        SaleRepository::delete_items(&mut tx, sale_id).await?;

        let mut items = Vec::with_capacity(priced.lines.len());
        for line in &priced.lines {
            let item = line.to_item(sale_id, now);
            SaleRepository::insert_item(&mut tx, &item).await?;
            ProductRepository::apply_stock_change(
                &mut tx,
                &line.product_id,
                -line.base_quantity,
                InventoryKind::Sale,
                Some(sale_id),
            )
            .await?;
            items.push(item);
        }

        // Balance: take the old contribution off, put the new one on
        if let Some(old_customer) = old.customer_id.as_deref() {
            CustomerRepository::adjust_balance(&mut tx, old_customer, -(old.grand_total - cleared)).await?;
        }
        if let Some(new_customer) = new_customer_id.as_deref() {
            CustomerRepository::adjust_balance(&mut tx, new_customer, totals.grand_total - cleared).await?;
            if old.customer_id.as_deref() != Some(new_customer) {
                PaymentRepository::reassign_customer(&mut tx, sale_id, new_customer).await?;
            }
            if let Some(warning) = credit_limit_warning(&mut tx, new_customer).await? {
                warnings.push(warning);
            }
        }

        let version = InvoiceVersionSnapshot {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.to_string(),
            version_number: old.version,
            data_json: snapshot_json,
            edit_reason: edit_reason.to_string(),
            diff_summary: diff_summary(&old, &old_items, &sale, &items),
            created_by: user.to_string(),
            created_at: now,
        };
        SaleRepository::insert_version(&mut tx, &version).await?;

        if !SaleRepository::save(&mut tx, &sale, expected_row_version).await? {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!("invoice {} was modified concurrently", sale.invoice_no),
            ));
        }

        let stored = SaleRepository::find(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
        if stored.version != sale.version || stored.row_version != sale.row_version {
            return Err(EngineError::conflict(
                ConflictKind::VersionVerification,
                format!(
                    "invoice {} read back as version {} (expected {})",
                    sale.invoice_no, stored.version, sale.version
                ),
            ));
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "sale.update",
                entity_type: "sale",
                entity_id: sale_id,
                before: Some(summary(&old)),
                after: Some(summary(&stored)),
            },
        )
        .await?;

        let payments = PaymentRepository::find_for_sale(&mut tx, sale_id).await?;

        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            invoice_no = %stored.invoice_no,
            version = stored.version,
            grand_total = %stored.grand_total,
            reason = %edit_reason,
            "Sale updated"
        );

        let touched_customers: Vec<&str> = old
            .customer_id
            .as_deref()
            .into_iter()
            .chain(stored.customer_id.as_deref())
            .collect();
        self.reconciler.reconcile_after_commit(touched_customers).await;
        self.notifier.committed(CommitEvent::SaleUpdated {
            sale_id: stored.id.clone(),
            invoice_no: stored.invoice_no.clone(),
            version: stored.version,
        });

        Ok(SaleOutcome {
            sale: stored,
            items,
            payments,
            warnings,
            replayed: false,
        })
    }

    /// Puts an invoice back to the state recorded in snapshot
    /// `version_number`, through the normal edit path.
    pub async fn restore_version(
        &self,
        sale_id: &str,
        version_number: i64,
        user: &str,
        expected_row_version: i64,
    ) -> EngineResult<SaleOutcome> {
        let snapshot = self
            .db
            .sales()
            .get_version(sale_id, version_number)
            .await?
            .ok_or_else(|| {
                EngineError::not_found("InvoiceVersion", format!("{}#{}", sale_id, version_number))
            })?;
        let data = snapshot.data()?;

        let request = UpdateSaleRequest {
            customer_id: data.sale.customer_id.clone(),
            invoice_date: Some(data.sale.invoice_date),
            items: data
                .items
                .iter()
                .map(|item| SaleLineRequest {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity.to_decimal(),
                    unit_price: item.unit_price.to_decimal(),
                })
                .collect(),
            discount: data.sale.discount.to_decimal(),
            notes: data.sale.notes.clone(),
        };

        let reason = format!("Restored version {}", version_number);
        self.update(sale_id, &request, user, &reason, expected_row_version)
            .await
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Soft-deletes an invoice. Deleting a deleted invoice returns it as is.
    pub async fn delete(&self, sale_id: &str, user: &str) -> EngineResult<SaleDetail> {
        let mut tx = self.db.begin().await?;

        let sale = SaleRepository::find(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
        let items = SaleRepository::find_items(&mut tx, sale_id).await?;

        if sale.is_deleted {
            let payments = PaymentRepository::find_for_sale(&mut tx, sale_id).await?;
            debug!(sale_id = %sale_id, "Sale already deleted");
            return Ok(SaleDetail {
                sale,
                items,
                payments,
            });
        }
        if sale.is_locked {
            return Err(ValidationError::invalid_state("Invoice", &sale.invoice_no, "is locked").into());
        }

        let now = Utc::now();

        for item in &items {
            ProductRepository::apply_stock_change(
                &mut tx,
                &item.product_id,
                item.base_quantity,
                InventoryKind::Adjustment,
                Some(sale_id),
            )
            .await?;
        }

        let mut payments = PaymentRepository::find_for_sale(&mut tx, sale_id).await?;
        for payment in payments.iter_mut() {
            if payment.status == PaymentStatus::Void {
                continue;
            }
            if payment.status.is_cleared() {
                CustomerRepository::adjust_balance(&mut tx, &payment.customer_id, payment.amount).await?;
            }

            let expected = payment.row_version;
            payment.status = PaymentStatus::Void;
            payment.row_version += 1;
            payment.updated_at = now;
            if !PaymentRepository::save(&mut tx, payment, expected).await? {
                return Err(EngineError::conflict(
                    ConflictKind::RowVersion,
                    format!("payment {} was modified concurrently", payment.id),
                ));
            }
        }

        if let Some(customer_id) = sale.customer_id.as_deref() {
            CustomerRepository::adjust_balance(&mut tx, customer_id, -sale.grand_total).await?;
        }

        let mut deleted = sale.clone();
        deleted.paid_amount = Money::zero();
        deleted.payment_status = SalePaymentStatus::Pending;
        deleted.is_deleted = true;
        deleted.deleted_by = Some(user.to_string());
        deleted.deleted_at = Some(now);
        deleted.row_version = sale.row_version + 1;
        deleted.last_modified_by = user.to_string();
        deleted.last_modified_at = now;
        deleted.updated_at = now;

        if !SaleRepository::save(&mut tx, &deleted, sale.row_version).await? {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!("invoice {} was modified concurrently", sale.invoice_no),
            ));
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: "sale.delete",
                entity_type: "sale",
                entity_id: sale_id,
                before: Some(summary(&sale)),
                after: Some(summary(&deleted)),
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            invoice_no = %deleted.invoice_no,
            grand_total = %deleted.grand_total,
            voided_payments = payments.len(),
            "Sale deleted"
        );

        self.notifier.alert(Alert::InvoiceDeleted {
            invoice_no: deleted.invoice_no.clone(),
            actor: user.to_string(),
            grand_total: deleted.grand_total,
        });
        self.reconciler
            .reconcile_after_commit(deleted.customer_id.as_deref())
            .await;
        self.notifier.committed(CommitEvent::SaleDeleted {
            sale_id: deleted.id.clone(),
            invoice_no: deleted.invoice_no.clone(),
        });

        Ok(SaleDetail {
            sale: deleted,
            items,
            payments,
        })
    }

    // =========================================================================
    // Lock and Reads
    // =========================================================================

    /// Locks or unlocks an invoice against edits and deletion.
    pub async fn set_locked(&self, sale_id: &str, locked: bool, user: &str) -> EngineResult<Sale> {
        let mut tx = self.db.begin().await?;

        let sale = SaleRepository::find(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
        if sale.is_deleted {
            return Err(ValidationError::invalid_state("Invoice", &sale.invoice_no, "has been deleted").into());
        }
        if sale.is_locked == locked {
            return Ok(sale);
        }

        let mut updated = sale.clone();
        updated.is_locked = locked;
        updated.row_version = sale.row_version + 1;
        updated.updated_at = Utc::now();

        if !SaleRepository::save(&mut tx, &updated, sale.row_version).await? {
            return Err(EngineError::conflict(
                ConflictKind::RowVersion,
                format!("invoice {} was modified concurrently", sale.invoice_no),
            ));
        }

        AuditRepository::record(
            &mut tx,
            AuditRecord {
                actor: user,
                action: if locked { "sale.lock" } else { "sale.unlock" },
                entity_type: "sale",
                entity_id: sale_id,
                before: None,
                after: None,
            },
        )
        .await?;

        tx.commit().await?;
        info!(sale_id = %sale_id, locked, "Sale lock changed");
        Ok(updated)
    }

    pub async fn get_sale(&self, sale_id: &str) -> EngineResult<SaleDetail> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
        let items = self.db.sales().get_items(sale_id).await?;
        let payments = self.db.payments().list_for_sale(sale_id).await?;
        Ok(SaleDetail {
            sale,
            items,
            payments,
        })
    }

    pub async fn list_versions(&self, sale_id: &str) -> EngineResult<Vec<InvoiceVersionSnapshot>> {
        Ok(self.db.sales().list_versions(sale_id).await?)
    }
}
