//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use crate::domain::value_objects::{CouponCode, UserId};

/// How a discount is derived from a cart's grand total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DiscountRule {
    #[default]
    None,
    /// Percentage of the grand total, `10` meaning ten percent.
    Percentage(Decimal),
    FixedAmount(Decimal),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coupon {
    pub(crate) code: CouponCode,
    pub(crate) rule: DiscountRule,
    pub(crate) min_amount: Decimal,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) deactivated: bool,
    pub(crate) used_by: HashSet<UserId>,
}

/// Reasons a coupon cannot be redeemed, in the order they are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    Deactivated,
    Expired,
    AlreadyUsed,
    MinAmountNotMet { minimum: Decimal },
}

impl Coupon {
    pub fn new(code: CouponCode, rule: DiscountRule, min_amount: Decimal, expires_at: DateTime<Utc>) -> Self {
        Self { code, rule, min_amount, expires_at, deactivated: false, used_by: HashSet::new() }
    }

    pub fn code(&self) -> &CouponCode { &self.code }
    pub fn rule(&self) -> DiscountRule { self.rule }
    pub fn min_amount(&self) -> Decimal { self.min_amount }
    pub fn is_used_by(&self, user: UserId) -> bool { self.used_by.contains(&user) }

    pub fn deactivate(&mut self) { self.deactivated = true; }

    /// Checks whether `user` may redeem this coupon against `grand_total` at `now`.
    pub fn eligibility(&self, user: UserId, grand_total: Decimal, now: DateTime<Utc>) -> Result<(), Ineligibility> {
        if self.deactivated { return Err(Ineligibility::Deactivated); }
        if now > self.expires_at { return Err(Ineligibility::Expired); }
        if self.is_used_by(user) { return Err(Ineligibility::AlreadyUsed); }
        if grand_total < self.min_amount { return Err(Ineligibility::MinAmountNotMet { minimum: self.min_amount }); }
        Ok(())
    }

    /// Returns `false` if the user had already redeemed it.
    pub fn record_use(&mut self, user: UserId) -> bool { self.used_by.insert(user) }
    pub fn release_use(&mut self, user: UserId) -> bool { self.used_by.remove(&user) }
}
