//! # Money Module
//!
//! Fixed-point `Money` (cents) and `Quantity` (hundredths of a unit).
//!
//! ## Why Integers?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004                                      │
//! │                                                                         │
//! │  Invoice invariants compare totals with a 0.01 tolerance. With integer  │
//! │  cents that tolerance is exactly one unit and every comparison is      │
//! │  exact:                                                                 │
//! │                                                                         │
//! │    grand_total = subtotal + vat_total - discount      (all in cents)   │
//! │    paid_amount <= grand_total + 1 cent                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Requests carry `rust_decimal::Decimal` values so that "at most two
//! decimal places" can be checked before conversion; everything after the
//! validation guard works in integers.
//!
//! ## Usage
//! ```rust
//! use ledger_core::money::{Money, Quantity};
//! use ledger_core::types::TaxRate;
//!
//! let qty = Quantity::from_hundredths(200);   // 2.00
//! let price = Money::from_cents(10_000);      // 100.00
//! let net = price.times_quantity(qty);
//! assert_eq!(net.cents(), 20_000);
//! assert_eq!(price.vat_for_quantity(qty, TaxRate::from_bps(500)).cents(), 1_000);
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::types::TaxRate;

/// One cent: the tolerance used by every "paid in full" comparison.
pub const CENT_TOLERANCE: Money = Money::from_cents(1);

/// Integer division rounding half away from zero.
///
/// All rounding in the ledger goes through here so that VAT, line totals
/// and base-unit conversions agree to the cent.
pub fn round_div(numerator: i128, denominator: i128) -> i64 {
    debug_assert!(denominator > 0);
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };
    rounded as i64
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in cents.
///
/// ## Design Decisions
/// - **i64 (signed)**: customer balances go negative when they hold credit
/// - **Single field tuple struct**: zero-cost over i64, stored as INTEGER
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Converts a decimal amount (e.g. `210.00`) to cents, rounding to the
    /// nearest cent. Returns `None` on overflow.
    ///
    /// ```rust
    /// use ledger_core::money::Money;
    /// use rust_decimal::Decimal;
    ///
    /// let amount = Money::from_decimal(Decimal::new(21050, 2)).unwrap();
    /// assert_eq!(amount.cents(), 21050);
    /// ```
    pub fn from_decimal(amount: Decimal) -> Option<Self> {
        (amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(Money)
    }

    /// Returns the value as a two-place decimal.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn min(self, other: Money) -> Money {
        Money(self.0.min(other.0))
    }

    #[inline]
    pub fn max(self, other: Money) -> Money {
        Money(self.0.max(other.0))
    }

    /// Clamps negative values to zero.
    #[inline]
    pub fn non_negative(self) -> Money {
        self.max(Money::zero())
    }

    /// Net line amount: `quantity × unit price`, rounded to the cent.
    pub fn times_quantity(&self, qty: Quantity) -> Money {
        Money(round_div(self.0 as i128 * qty.hundredths() as i128, 100))
    }

    /// VAT on `quantity × unit price` at `rate`, rounded to the cent once.
    ///
    /// Rounding happens on the full product rather than on the already
    /// rounded net amount, so `vat = round(qty·price·pct/100, 2)` holds.
    pub fn vat_for_quantity(&self, qty: Quantity, rate: TaxRate) -> Money {
        let numerator = self.0 as i128 * qty.hundredths() as i128 * rate.bps() as i128;
        Money(round_div(numerator, 100 * 10_000))
    }
}

/// Displays as a plain two-place decimal (`210.00`, `-5.50`).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Quantity Type
// =============================================================================

/// A quantity in hundredths of a unit (`250` = 2.50).
///
/// Used for sold quantities, stock levels and unit conversion factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Quantity(i64);

impl Quantity {
    /// One whole unit.
    pub const ONE: Quantity = Quantity(100);

    #[inline]
    pub const fn from_hundredths(hundredths: i64) -> Self {
        Quantity(hundredths)
    }

    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * 100)
    }

    /// Converts a decimal quantity, rounding to two places.
    pub fn from_decimal(qty: Decimal) -> Option<Self> {
        (qty * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(Quantity)
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    #[inline]
    pub const fn hundredths(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Converts a sold quantity to base units using a conversion factor.
    ///
    /// ```rust
    /// use ledger_core::money::Quantity;
    ///
    /// // 2 boxes of 12
    /// let base = Quantity::from_units(2).to_base(Quantity::from_units(12));
    /// assert_eq!(base, Quantity::from_units(24));
    /// ```
    pub fn to_base(&self, conversion: Quantity) -> Quantity {
        Quantity(round_div(self.0 as i128 * conversion.0 as i128, 100))
    }

    /// Scales by a rational factor `num/den` (used for the 120% warning).
    pub fn scaled(&self, num: i64, den: i64) -> Quantity {
        Quantity(round_div(self.0 as i128 * num as i128, den as i128))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::zero()
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Quantity {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Quantity(-self.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), Add::add)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(21000).to_string(), "210.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Quantity::from_hundredths(250).to_string(), "2.50");
    }

    #[test]
    fn test_round_div_half_away_from_zero() {
        assert_eq!(round_div(5, 10), 1);
        assert_eq!(round_div(4, 10), 0);
        assert_eq!(round_div(-5, 10), -1);
        assert_eq!(round_div(-4, 10), 0);
    }

    #[test]
    fn test_line_math_reference_scenario() {
        // qty 2 × 100.00 at 5% VAT
        let qty = Quantity::from_units(2);
        let price = Money::from_cents(10_000);
        let rate = TaxRate::from_bps(500);

        assert_eq!(price.times_quantity(qty).cents(), 20_000);
        assert_eq!(price.vat_for_quantity(qty, rate).cents(), 1_000);
    }

    #[test]
    fn test_vat_rounds_once_on_full_product() {
        // 1.5 × 0.33 = 0.495 net, VAT at 5% = 0.02475 → 0.02
        let qty = Quantity::from_hundredths(150);
        let price = Money::from_cents(33);
        assert_eq!(price.times_quantity(qty).cents(), 50);
        assert_eq!(price.vat_for_quantity(qty, TaxRate::from_bps(500)).cents(), 2);
    }

    #[test]
    fn test_decimal_conversions() {
        let m = Money::from_decimal(Decimal::new(1999, 2)).unwrap();
        assert_eq!(m.cents(), 1999);
        assert_eq!(m.to_decimal(), Decimal::new(1999, 2));

        let q = Quantity::from_decimal(Decimal::new(25, 1)).unwrap();
        assert_eq!(q.hundredths(), 250);
    }

    #[test]
    fn test_to_base_and_scaled() {
        let half_box = Quantity::from_hundredths(50);
        assert_eq!(half_box.to_base(Quantity::from_units(12)), Quantity::from_units(6));
        assert_eq!(Quantity::from_units(10).scaled(6, 5), Quantity::from_units(12));
    }

    #[test]
    fn test_sum_and_clamp() {
        let total: Money = [100, 250, -50].iter().map(|c| Money::from_cents(*c)).sum();
        assert_eq!(total.cents(), 300);
        assert_eq!(Money::from_cents(-10).non_negative(), Money::zero());
    }
}
