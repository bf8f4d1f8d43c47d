//! # Validation Guard
//!
//! Pure, side-effect-free checks consulted before any write.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request boundary (Decimal inputs)                            │
//! │  ├── check_quantity / check_unit_price / check_payment_amount         │
//! │  └── bounds + "at most two decimal places", then → Quantity / Money   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Against loaded state (inside the transaction)                │
//! │  ├── check_stock           (required ≤ current + released)             │
//! │  ├── check_invoice_payment (customer, fully paid, outstanding)         │
//! │  └── check_invoice_number  (format, floor; uniqueness is the DB's)     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (invoice_no) WHERE is_deleted = 0                          │
//! │  ├── PRIMARY KEY on payment idempotency keys                           │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scalar checks return a [`ValidationResult`] carrying the converted value.
//! Composite checks return a [`ValidationReport`] so that warnings (low
//! stock) can travel alongside errors. A report is valid when it holds no
//! errors; warnings never make it invalid.
//!
//! ## Usage
//! ```rust
//! use ledger_core::validation::{check_quantity, ValidationReport};
//! use rust_decimal::Decimal;
//!
//! let mut report = ValidationReport::new();
//! let qty = report.record(check_quantity("quantity", Decimal::new(250, 2)));
//! assert_eq!(qty.unwrap().hundredths(), 250);
//! assert!(report.is_valid());
//!
//! report.record(check_quantity("quantity", Decimal::new(1, 3)));
//! assert!(!report.is_valid());
//! ```

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::error::ValidationError;
use crate::money::{Money, Quantity, CENT_TOLERANCE};
use crate::types::{Sale, TaxRate};
use crate::{
    LOW_STOCK_MARGIN_PERCENT, MAX_PAYMENT_AMOUNT, MAX_QUANTITY, MAX_UNIT_PRICE,
    MIN_INVOICE_DIGITS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Money and quantities are stored with two decimal places.
const MAX_SCALE: u32 = 2;

// =============================================================================
// Validation Report
// =============================================================================

/// Outcome of a validation pass: hard errors plus advisory warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

fn serialize_errors<S>(errors: &[ValidationError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_error(error: ValidationError) -> Self {
        ValidationReport {
            errors: vec![error],
            warnings: Vec::new(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Keeps the value of a passing check, records the error of a failing one.
    pub fn record<T>(&mut self, result: ValidationResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// `Ok(warnings)` when valid, otherwise the whole report.
    pub fn into_result(self) -> Result<Vec<String>, ValidationReport> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

impl From<ValidationError> for ValidationReport {
    fn from(error: ValidationError) -> Self {
        ValidationReport::from_error(error)
    }
}

// =============================================================================
// Scalar Checks
// =============================================================================

fn check_scale(field: &str, value: Decimal) -> ValidationResult<()> {
    if value.normalize().scale() > MAX_SCALE {
        return Err(ValidationError::TooPrecise {
            field: field.to_string(),
            max: MAX_SCALE,
        });
    }
    Ok(())
}

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed 100,000
/// - At most two decimal places
pub fn check_quantity(field: &str, qty: Decimal) -> ValidationResult<Quantity> {
    if qty <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    check_scale(field, qty)?;

    let quantity = Quantity::from_decimal(qty).filter(|q| *q <= MAX_QUANTITY);
    quantity.ok_or_else(|| ValidationError::OutOfRange {
        field: field.to_string(),
        min: "0.01".to_string(),
        max: MAX_QUANTITY.to_string(),
    })
}

/// Validates a unit price.
///
/// ## Rules
/// - Must be non-negative (zero is allowed for free items)
/// - Must not exceed 1,000,000
/// - At most two decimal places
///
/// ## Example
/// ```rust
/// use ledger_core::validation::check_unit_price;
/// use rust_decimal::Decimal;
///
/// assert!(check_unit_price("unit_price", Decimal::ZERO).is_ok());
/// assert!(check_unit_price("unit_price", Decimal::new(1099, 2)).is_ok());
/// assert!(check_unit_price("unit_price", Decimal::new(-1, 0)).is_err());
/// assert!(check_unit_price("unit_price", Decimal::new(10999, 3)).is_err());
/// ```
pub fn check_unit_price(field: &str, price: Decimal) -> ValidationResult<Money> {
    check_scale(field, price)?;
    let money = Money::from_decimal(price).filter(|m| !m.is_negative() && *m <= MAX_UNIT_PRICE);
    money.ok_or_else(|| ValidationError::OutOfRange {
        field: field.to_string(),
        min: "0.00".to_string(),
        max: MAX_UNIT_PRICE.to_string(),
    })
}

/// Validates a header discount against the pre-discount total.
pub fn check_discount(discount: Decimal, gross: Money) -> ValidationResult<Money> {
    check_scale("discount", discount)?;
    let money = Money::from_decimal(discount)
        .filter(|m| !m.is_negative() && *m <= gross.non_negative());
    money.ok_or_else(|| ValidationError::OutOfRange {
        field: "discount".to_string(),
        min: "0.00".to_string(),
        max: gross.non_negative().to_string(),
    })
}

/// Validates a payment amount.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed 10,000,000
/// - At most two decimal places
pub fn check_payment_amount(field: &str, amount: Decimal) -> ValidationResult<Money> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    check_scale(field, amount)?;

    let money = Money::from_decimal(amount).filter(|m| *m <= MAX_PAYMENT_AMOUNT);
    money.ok_or_else(|| ValidationError::OutOfRange {
        field: field.to_string(),
        min: "0.01".to_string(),
        max: MAX_PAYMENT_AMOUNT.to_string(),
    })
}

/// Validates a VAT percentage read from settings.
pub fn check_vat_percent(pct: Decimal) -> ValidationResult<TaxRate> {
    let rate = TaxRate::from_percent(pct).filter(|r| r.bps() <= 10_000);
    rate.ok_or_else(|| ValidationError::OutOfRange {
        field: "vat_percent".to_string(),
        min: "0".to_string(),
        max: "100".to_string(),
    })
}

/// Validates the format of an invoice number and returns its numeric value.
///
/// ## Rules
/// - Digits only, at least four of them
/// - Numeric value at or above `floor`
///
/// Uniqueness among non-deleted sales needs the database and is checked by
/// the allocator.
///
/// ## Example
/// ```rust
/// use ledger_core::validation::check_invoice_number;
///
/// assert_eq!(check_invoice_number("2001", 2000).unwrap(), 2001);
/// assert!(check_invoice_number("0999", 2000).is_err()); // below floor
/// assert!(check_invoice_number("INV-2001", 2000).is_err());
/// assert!(check_invoice_number("201", 0).is_err());
/// ```
pub fn check_invoice_number(invoice_no: &str, floor: u64) -> ValidationResult<u64> {
    if invoice_no.is_empty() {
        return Err(ValidationError::required("invoice_no"));
    }

    if invoice_no.len() < MIN_INVOICE_DIGITS || !invoice_no.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "invoice_no".to_string(),
            reason: format!("must be at least {} digits", MIN_INVOICE_DIGITS),
        });
    }

    let value: u64 = invoice_no.parse().map_err(|_| ValidationError::InvalidFormat {
        field: "invoice_no".to_string(),
        reason: "number is too large".to_string(),
    })?;

    if value < floor {
        return Err(ValidationError::OutOfRange {
            field: "invoice_no".to_string(),
            min: floor.to_string(),
            max: u64::MAX.to_string(),
        });
    }

    Ok(value)
}

// =============================================================================
// Composite Checks
// =============================================================================

/// Checks that `required` base units can be taken from stock.
///
/// `released` is stock that the operation itself gives back first (the
/// old lines of an invoice being edited), so an edit is judged against
/// stock as if the old lines never existed.
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Edit invoice: line qty 2 → 3, stock now 8                             │
/// │                                                                         │
/// │  available = current (8) + released (2) = 10                           │
/// │       │                                                                 │
/// │       ├── required (3) > available? → InsufficientStock                │
/// │       │                                                                 │
/// │       ├── remaining (7) < 120% of required (3.6)? → warning            │
/// │       │                                                                 │
/// │       └── OK                                                            │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn check_stock(
    product: &str,
    required: Quantity,
    current: Quantity,
    released: Quantity,
) -> ValidationReport {
    let mut report = ValidationReport::new();
    let available = current + released;

    if required > available {
        report.error(ValidationError::InsufficientStock {
            product: product.to_string(),
            available: available.to_string(),
            requested: required.to_string(),
        });
        return report;
    }

    let remaining = available - required;
    if remaining < required.scaled(LOW_STOCK_MARGIN_PERCENT, 100) {
        report.warn(format!(
            "Low stock for {}: {} left after this sale",
            product, remaining
        ));
    }

    report
}

/// Checks a payment of `amount` against the invoice it is linked to.
///
/// ## Rules
/// - Invoice must not be deleted
/// - Invoice must belong to `customer_id`
/// - Invoice must not already be fully paid
/// - Amount must not exceed the outstanding balance (one cent tolerance)
pub fn check_invoice_payment(amount: Money, sale: &Sale, customer_id: &str) -> ValidationReport {
    let mut report = ValidationReport::new();

    if sale.is_deleted {
        report.error(ValidationError::invalid_state(
            "Invoice",
            &sale.invoice_no,
            "has been deleted",
        ));
        return report;
    }

    if sale.customer_id.as_deref() != Some(customer_id) {
        report.error(ValidationError::CustomerMismatch {
            invoice_no: sale.invoice_no.clone(),
            customer_id: customer_id.to_string(),
        });
    }

    let outstanding = sale.outstanding();
    if sale.is_fully_paid() {
        report.error(ValidationError::invalid_state(
            "Invoice",
            &sale.invoice_no,
            "is already fully paid",
        ));
    } else if amount > outstanding + CENT_TOLERANCE {
        report.error(ValidationError::ExceedsOutstanding {
            invoice_no: sale.invoice_no.clone(),
            amount: amount.to_string(),
            outstanding: outstanding.to_string(),
        });
    }

    report
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SalePaymentStatus;
    use chrono::Utc;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn invoice(customer: Option<&str>, grand: i64, paid: i64) -> Sale {
        let now = Utc::now();
        Sale {
            id: "s1".into(),
            invoice_no: "2001".into(),
            customer_id: customer.map(String::from),
            external_ref: None,
            invoice_date: now,
            subtotal: Money::from_cents(grand),
            vat_total: Money::zero(),
            discount: Money::zero(),
            grand_total: Money::from_cents(grand),
            paid_amount: Money::from_cents(paid),
            payment_status: SalePaymentStatus::derive(
                Money::from_cents(paid),
                Money::from_cents(grand),
            ),
            version: 1,
            is_deleted: false,
            is_locked: false,
            row_version: 1,
            notes: None,
            created_by: "u1".into(),
            last_modified_by: "u1".into(),
            last_modified_at: now,
            deleted_by: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_check_quantity() {
        assert_eq!(check_quantity("q", dec("2")).unwrap().hundredths(), 200);
        assert!(check_quantity("q", dec("0.01")).is_ok());
        assert!(check_quantity("q", dec("100000")).is_ok());
        assert!(check_quantity("q", dec("2.500")).is_ok()); // trailing zero

        assert!(matches!(
            check_quantity("q", dec("0")),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(check_quantity("q", dec("-1")).is_err());
        assert!(matches!(
            check_quantity("q", dec("100000.01")),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            check_quantity("q", dec("1.005")),
            Err(ValidationError::TooPrecise { .. })
        ));
    }

    #[test]
    fn test_check_unit_price() {
        assert!(check_unit_price("p", dec("0")).is_ok());
        assert_eq!(check_unit_price("p", dec("1000000")).unwrap().cents(), 100_000_000);
        assert!(check_unit_price("p", dec("1000000.01")).is_err());
        assert!(check_unit_price("p", dec("-0.01")).is_err());
    }

    #[test]
    fn test_check_discount() {
        let gross = Money::from_cents(21000);
        assert!(check_discount(dec("0"), gross).unwrap().is_zero());
        assert_eq!(check_discount(dec("210"), gross).unwrap(), gross);
        assert!(check_discount(dec("210.01"), gross).is_err());
        assert!(check_discount(dec("-1"), gross).is_err());
    }

    #[test]
    fn test_check_payment_amount() {
        assert_eq!(check_payment_amount("a", dec("50")).unwrap().cents(), 5000);
        assert!(check_payment_amount("a", dec("10000000")).is_ok());
        assert!(check_payment_amount("a", dec("10000000.01")).is_err());
        assert!(check_payment_amount("a", dec("0")).is_err());
        assert!(check_payment_amount("a", dec("12.345")).is_err());
    }

    #[test]
    fn test_check_vat_percent() {
        assert_eq!(check_vat_percent(dec("5")).unwrap().bps(), 500);
        assert!(check_vat_percent(dec("100")).is_ok());
        assert!(check_vat_percent(dec("100.5")).is_err());
        assert!(check_vat_percent(dec("-5")).is_err());
    }

    #[test]
    fn test_check_invoice_number() {
        assert_eq!(check_invoice_number("2000", 2000).unwrap(), 2000);
        assert_eq!(check_invoice_number("000123456", 0).unwrap(), 123_456);
        assert!(check_invoice_number("", 2000).is_err());
        assert!(check_invoice_number("1999", 2000).is_err());
        assert!(check_invoice_number("20a1", 2000).is_err());
        assert!(check_invoice_number("99999999999999999999999", 0).is_err());
    }

    #[test]
    fn test_check_stock_fresh_sale() {
        let report = check_stock("SKU-1", Quantity::from_units(2), Quantity::from_units(10), Quantity::zero());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());

        let report = check_stock("SKU-1", Quantity::from_units(11), Quantity::from_units(10), Quantity::zero());
        assert!(!report.is_valid());
    }

    #[test]
    fn test_check_stock_counts_released_quantity() {
        // 8 in stock after an earlier sale of 2; editing that sale to 10 is fine
        let report = check_stock("SKU-1", Quantity::from_units(10), Quantity::from_units(8), Quantity::from_units(2));
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_check_stock_low_stock_warning() {
        // remaining 5 < 1.2 × 5
        let report = check_stock("SKU-1", Quantity::from_units(5), Quantity::from_units(10), Quantity::zero());
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);

        // remaining 6 == 1.2 × 5, no warning
        let report = check_stock("SKU-1", Quantity::from_units(5), Quantity::from_units(11), Quantity::zero());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_check_invoice_payment() {
        let sale = invoice(Some("c1"), 21000, 0);
        assert!(check_invoice_payment(Money::from_cents(5000), &sale, "c1").is_valid());
        assert!(check_invoice_payment(Money::from_cents(21001), &sale, "c1").is_valid());
        assert!(!check_invoice_payment(Money::from_cents(21002), &sale, "c1").is_valid());
        assert!(!check_invoice_payment(Money::from_cents(5000), &sale, "c2").is_valid());

        let paid = invoice(Some("c1"), 21000, 21000);
        let report = check_invoice_payment(Money::from_cents(1), &paid, "c1");
        assert!(matches!(report.errors[0], ValidationError::InvalidState { .. }));

        let mut deleted = invoice(Some("c1"), 21000, 0);
        deleted.is_deleted = true;
        assert!(!check_invoice_payment(Money::from_cents(1), &deleted, "c1").is_valid());
    }

    #[test]
    fn test_report_merge_and_result() {
        let mut report = ValidationReport::new();
        report.warn("low stock");
        assert_eq!(report.clone().into_result().unwrap(), vec!["low stock".to_string()]);

        let mut other = ValidationReport::new();
        other.error(ValidationError::required("items"));
        report.merge(other);
        assert!(!report.is_valid());
        assert_eq!(report.to_string(), "items is required");
        assert!(report.into_result().is_err());
    }
}
