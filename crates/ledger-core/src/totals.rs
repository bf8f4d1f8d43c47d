//! # Invoice Totals
//!
//! Line amounts, invoice totals and settlement of already-paid money.
//!
//! ```text
//! per line:   net        = round(qty × unit_price)
//!             vat        = round(qty × unit_price × vat% / 100)
//!             line_total = net + vat
//!
//! invoice:    subtotal    = Σ net
//!             vat_total   = Σ vat
//!             grand_total = subtotal + vat_total − discount
//! ```
//!
//! Everything is integer cents, so `grand_total` is exact and the 0.01
//! tolerance in the invariants only absorbs per-line VAT rounding.

use serde::{Deserialize, Serialize};

use crate::money::{Money, Quantity, CENT_TOLERANCE};
use crate::types::{SalePaymentStatus, TaxRate};

/// Computed amounts for one invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub net: Money,
    pub vat: Money,
    pub line_total: Money,
}

/// Computes the amounts of a line at the given VAT rate.
pub fn line_amounts(quantity: Quantity, unit_price: Money, rate: TaxRate) -> LineAmounts {
    let net = unit_price.times_quantity(quantity);
    let vat = unit_price.vat_for_quantity(quantity, rate);
    LineAmounts {
        net,
        vat,
        line_total: net + vat,
    }
}

/// Header totals of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub vat_total: Money,
    pub discount: Money,
    pub grand_total: Money,
}

impl InvoiceTotals {
    /// Sums line amounts and applies the header discount.
    pub fn from_lines<'a, I>(lines: I, discount: Money) -> Self
    where
        I: IntoIterator<Item = &'a LineAmounts>,
    {
        let mut subtotal = Money::zero();
        let mut vat_total = Money::zero();
        for line in lines {
            subtotal += line.net;
            vat_total += line.vat;
        }
        InvoiceTotals {
            subtotal,
            vat_total,
            discount,
            grand_total: subtotal + vat_total - discount,
        }
    }

    /// Amount before the discount is applied.
    pub fn gross(&self) -> Money {
        self.subtotal + self.vat_total
    }
}

/// Result of fitting an already-paid amount onto a (possibly new) total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub paid_amount: Money,
    pub status: SalePaymentStatus,
    /// Portion of the paid amount above the total, credited back to the
    /// customer.
    pub excess: Money,
}

/// Caps `paid` at `grand_total` and derives the payment status.
///
/// Paid amounts within one cent above the total are kept as-is.
///
/// ```rust
/// use ledger_core::money::Money;
/// use ledger_core::totals::settle;
/// use ledger_core::types::SalePaymentStatus;
///
/// let s = settle(Money::from_cents(21000), Money::from_cents(15000));
/// assert_eq!(s.paid_amount.cents(), 15000);
/// assert_eq!(s.excess.cents(), 6000);
/// assert_eq!(s.status, SalePaymentStatus::Paid);
/// ```
pub fn settle(paid: Money, grand_total: Money) -> Settlement {
    let paid = paid.non_negative();
    let (paid_amount, excess) = if paid > grand_total + CENT_TOLERANCE {
        (grand_total, paid - grand_total)
    } else {
        (paid, Money::zero())
    };
    Settlement {
        paid_amount,
        status: SalePaymentStatus::derive(paid_amount, grand_total),
        excess,
    }
}
