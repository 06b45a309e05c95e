//! Product read model
//!
//! Products belong to the catalog. The checkout core only ever sees the
//! price and the stock count as they were at lookup time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::ProductId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    price: Decimal,
    stock: u32,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: Decimal, stock: u32) -> Self {
        Self { id, name: name.into(), price, stock }
    }

    pub fn id(&self) -> ProductId { self.id }
    pub fn price(&self) -> Decimal { self.price }

    /// Whether `quantity` units could be supplied from the current stock.
    pub fn can_supply(&self, quantity: u32) -> bool { quantity <= self.stock }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stock_bounds() {
        let p = Product::new(ProductId::new(), "Widget", dec!(19.99), 2);
        assert!(p.can_supply(2));
        assert!(!p.can_supply(3));
        let empty = Product::new(ProductId::new(), "Gadget", dec!(5), 0);
        assert!(!empty.can_supply(1));
        assert!(empty.can_supply(0));
    }
}
