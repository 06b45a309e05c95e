//! Stock guard.
//!
//! Checks are advisory reads against the catalog; nothing is reserved. The
//! same check runs when a line is added, when it is incremented and once
//! more for every line when checkout starts.

use crate::domain::aggregates::{LineItem, Product};
use crate::ports::Catalog;
use crate::{CheckoutError, Entity, Result};

pub fn check_availability(product: &Product, requested: u32) -> Result<()> {
    if requested == 0 || product.can_supply(requested) {
        Ok(())
    } else {
        Err(CheckoutError::OutOfStock { product_id: product.id() })
    }
}

/// Re-reads every product behind `lines` and fails on the first line whose
/// quantity the catalog can no longer supply.
pub async fn check_lines(catalog: &dyn Catalog, lines: &[LineItem]) -> Result<()> {
    for line in lines {
        let product = catalog.product(line.product_id).await?.ok_or(CheckoutError::NotFound(Entity::Product))?;
        check_availability(&product, line.quantity)?;
    }
    Ok(())
}
