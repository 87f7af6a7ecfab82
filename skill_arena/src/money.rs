//! Fixed-point currency helpers.
//!
//! Amounts are `Decimal` values with two fractional digits.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Fractional digits of the currency
pub const CURRENCY_SCALE: u32 = 2;

/// Largest amount any column can hold (`NUMERIC(14, 2)`)
pub const MAX_AMOUNT: Decimal = dec!(999999999999.99);

/// Round to currency precision using banker's rounding (half-even)
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Truncate to currency precision, never rounding up
pub fn floor_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::ToZero)
}

/// `true` if the amount is strictly positive, at most [`MAX_AMOUNT`] and
/// has at most two decimals
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO
        && amount <= MAX_AMOUNT
        && amount.normalize().scale() <= CURRENCY_SCALE
}

/// `balance + amount`, or `None` if the sum would exceed [`MAX_AMOUNT`]
pub fn checked_credit(balance: Decimal, amount: Decimal) -> Option<Decimal> {
    balance.checked_add(amount).filter(|sum| *sum <= MAX_AMOUNT)
}

/// `amount × count`, or `None` if the product would exceed [`MAX_AMOUNT`]
pub fn checked_total(amount: Decimal, count: u32) -> Option<Decimal> {
    amount
        .checked_mul(Decimal::from(count))
        .filter(|total| *total <= MAX_AMOUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_currency(dec!(0.125)), dec!(0.12));
        assert_eq!(round_currency(dec!(0.135)), dec!(0.14));
        assert_eq!(round_currency(dec!(160.000)), dec!(160.00));
    }

    #[test]
    fn test_floor_never_rounds_up() {
        assert_eq!(floor_currency(dec!(6.666)), dec!(6.66));
        assert_eq!(floor_currency(dec!(6.669)), dec!(6.66));
    }

    #[test]
    fn test_valid_amount() {
        assert!(is_valid_amount(dec!(10)));
        assert!(is_valid_amount(dec!(10.50)));
        assert!(is_valid_amount(dec!(10.500)));
        assert!(!is_valid_amount(dec!(10.505)));
        assert!(!is_valid_amount(Decimal::ZERO));
        assert!(!is_valid_amount(dec!(-1)));
        assert!(is_valid_amount(MAX_AMOUNT));
        assert!(!is_valid_amount(dec!(1000000000000)));
        assert!(!is_valid_amount(dec!(10000000000000000000000000000)));
    }

    #[test]
    fn test_checked_credit_caps_balance() {
        assert_eq!(checked_credit(dec!(10), dec!(5.50)), Some(dec!(15.50)));
        assert_eq!(checked_credit(MAX_AMOUNT, dec!(0.01)), None);
        assert_eq!(checked_credit(Decimal::MAX, Decimal::MAX), None);
    }

    #[test]
    fn test_checked_total() {
        assert_eq!(checked_total(dec!(20), 8), Some(dec!(160)));
        assert_eq!(checked_total(dec!(500000000000), 2), None);
        assert_eq!(checked_total(dec!(10000000000000000000000000000), 10), None);
    }
}
