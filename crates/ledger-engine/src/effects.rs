//! In-transaction steps shared by the sale and payment managers.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::debug;

use ledger_core::validation::check_vat_percent;
use ledger_core::{settle, Payment, TaxRate};
use ledger_db::{CustomerRepository, PaymentRepository, SaleRepository, SettingsRepository, VAT_PERCENT_KEY};

use crate::error::{EngineError, EngineResult};

/// Current VAT rate: the `vat_percent` setting, else `fallback`.
pub(crate) async fn vat_rate(conn: &mut SqliteConnection, fallback: TaxRate) -> EngineResult<TaxRate> {
    let Some(raw) = SettingsRepository::find(conn, VAT_PERCENT_KEY).await? else {
        return Ok(fallback);
    };

    let pct: Decimal = raw
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("vat_percent setting is not a number: {:?}", raw)))?;
    check_vat_percent(pct).map_err(|e| EngineError::Config(e.to_string()))
}

/// Takes a cleared payment off the customer's balance and re-settles its
/// invoice. The payment row must already be stored as CLEARED.
pub(crate) async fn apply_cleared(conn: &mut SqliteConnection, payment: &Payment) -> EngineResult<()> {
    CustomerRepository::adjust_balance(conn, &payment.customer_id, -payment.amount).await?;
    if let Some(sale_id) = payment.sale_id.as_deref() {
        resettle_invoice(conn, sale_id, None).await?;
    }
    Ok(())
}

/// Undoes [`apply_cleared`]. The invoice is re-settled without this
/// payment whatever its stored row says.
pub(crate) async fn reverse_cleared(conn: &mut SqliteConnection, payment: &Payment) -> EngineResult<()> {
    CustomerRepository::adjust_balance(conn, &payment.customer_id, payment.amount).await?;
    if let Some(sale_id) = payment.sale_id.as_deref() {
        resettle_invoice(conn, sale_id, Some(&payment.id)).await?;
    }
    Ok(())
}

/// Sets `paid_amount` and `payment_status` from the CLEARED payments on the
/// invoice, capped at its grand total.
async fn resettle_invoice(
    conn: &mut SqliteConnection,
    sale_id: &str,
    excluding: Option<&str>,
) -> EngineResult<()> {
    let sale = SaleRepository::find(conn, sale_id)
        .await?
        .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;
    if sale.is_deleted {
        return Ok(());
    }

    let cleared = PaymentRepository::cleared_total_for_sale(conn, sale_id, excluding).await?;
    let settlement = settle(cleared, sale.grand_total);
    debug!(
        sale_id = %sale_id,
        cleared = %cleared,
        paid_amount = %settlement.paid_amount,
        status = %settlement.status,
        "Invoice re-settled"
    );
    SaleRepository::set_paid_amount(conn, sale_id, settlement.paid_amount, settlement.status).await?;
    Ok(())
}
