//! Value Objects for the checkout core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::now_v7()) }
            pub fn from_uuid(id: Uuid) -> Self { Self(id) }
            pub fn as_uuid(&self) -> Uuid { self.0 }
        }

        impl Default for $name {
            fn default() -> Self { Self::new() }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> { Uuid::parse_str(s).map(Self) }
        }
    };
}

entity_id!(
    /// Identifier of a storefront user. Users live outside this crate.
    UserId
);
entity_id!(ProductId);
entity_id!(CartId);
entity_id!(OrderId);
entity_id!(AddressId);

/// Coupon code value object. Codes are matched case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "String", into = "String")]
#[sqlx(transparent)]
pub struct CouponCode(String);

impl CouponCode {
    pub const MAX_LEN: usize = 32;

    pub fn new(value: impl Into<String>) -> Result<Self, CouponCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(CouponCodeError::Empty); }
        if value.len() > Self::MAX_LEN { return Err(CouponCodeError::TooLong); }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(CouponCodeError::InvalidCharacter);
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for CouponCode {
    type Error = CouponCodeError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<CouponCode> for String {
    fn from(code: CouponCode) -> Self { code.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponCodeError {
    #[error("coupon code is empty")]
    Empty,
    #[error("coupon code is longer than {} characters", CouponCode::MAX_LEN)]
    TooLong,
    #[error("coupon code may only contain letters, digits, '-' and '_'")]
    InvalidCharacter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_code_normalized() {
        let code = CouponCode::new("  save10 ").unwrap();
        assert_eq!(code.as_str(), "SAVE10");
        assert_eq!(code, CouponCode::new("SAVE10").unwrap());
    }

    #[test]
    fn test_coupon_code_rejects_garbage() {
        assert_eq!(CouponCode::new("   "), Err(CouponCodeError::Empty));
        assert_eq!(CouponCode::new("a".repeat(33)), Err(CouponCodeError::TooLong));
        assert_eq!(CouponCode::new("TEN OFF"), Err(CouponCodeError::InvalidCharacter));
    }

    #[test]
    fn test_ids_round_trip_through_strings() {
        let id = CartId::new();
        let parsed: CartId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
