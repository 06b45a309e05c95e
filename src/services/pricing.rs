//! Pricing engine.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::DiscountRule;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub total: Decimal,
    pub discount: Decimal,
}

/// Applies `rule` to `grand_total`.
///
/// The payable total never goes below zero: a discount larger than the cart
/// is capped at the grand total. Percentages are clamped to `0..=100` and
/// the result is rounded to cents.
pub fn compute_total(grand_total: Decimal, rule: DiscountRule) -> Quote {
    let grand_total = grand_total.max(Decimal::ZERO);
    let discount = match rule {
        DiscountRule::None => Decimal::ZERO,
        DiscountRule::Percentage(rate) => {
            let rate = rate.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
            (grand_total * rate / Decimal::ONE_HUNDRED).round_dp(2)
        }
        DiscountRule::FixedAmount(amount) => amount.max(Decimal::ZERO),
    }
    .min(grand_total);
    Quote { total: grand_total - discount, discount }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_no_rule() {
        assert_eq!(compute_total(dec!(20), DiscountRule::None), Quote { total: dec!(20), discount: dec!(0) });
    }

    #[test]
    fn test_percentage() {
        assert_eq!(compute_total(dec!(20), DiscountRule::Percentage(dec!(10))), Quote { total: dec!(18), discount: dec!(2) });
        assert_eq!(compute_total(dec!(9.99), DiscountRule::Percentage(dec!(15))), Quote { total: dec!(8.49), discount: dec!(1.50) });
    }

    #[test]
    fn test_fixed_amount() {
        assert_eq!(compute_total(dec!(50), DiscountRule::FixedAmount(dec!(7.5))), Quote { total: dec!(42.5), discount: dec!(7.5) });
    }

    #[test]
    fn test_total_is_clamped_at_zero() {
        assert_eq!(compute_total(dec!(5), DiscountRule::FixedAmount(dec!(8))), Quote { total: dec!(0), discount: dec!(5) });
        assert_eq!(compute_total(dec!(5), DiscountRule::Percentage(dec!(150))), Quote { total: dec!(0), discount: dec!(5) });
        assert_eq!(compute_total(dec!(5), DiscountRule::FixedAmount(dec!(-3))).total, dec!(5));
    }
}
