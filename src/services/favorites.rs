//! Per-user favorite products.

use tracing::{debug, instrument};

use super::Context;
use crate::domain::aggregates::Product;
use crate::domain::value_objects::{ProductId, UserId};
use crate::{CheckoutError, Entity, Result};

#[derive(Clone)]
pub struct Favorites {
    ctx: Context,
}

impl Favorites {
    pub fn new(ctx: Context) -> Self { Self { ctx } }

    /// The user's favorites as they currently appear in the catalog.
    /// Products that have left the catalog are skipped.
    pub async fn list(&self, user: UserId) -> Result<Vec<Product>> {
        let ids = self.ctx.store.favorites(user).await?;
        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            match self.ctx.catalog.product(id).await? {
                Some(product) => products.push(product),
                None => debug!(product_id = %id, "favorite no longer in catalog"),
            }
        }
        Ok(products)
    }

    /// Returns `false` when the product was already a favorite.
    #[instrument(skip(self))]
    pub async fn add(&self, user: UserId, product: ProductId) -> Result<bool> {
        if self.ctx.catalog.product(product).await?.is_none() {
            return Err(CheckoutError::NotFound(Entity::Product));
        }
        Ok(self.ctx.store.add_favorite(user, product).await?)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user: UserId, product: ProductId) -> Result<()> {
        if self.ctx.store.remove_favorite(user, product).await? {
            Ok(())
        } else {
            Err(CheckoutError::NotFound(Entity::Product))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::Harness;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_favorites_lifecycle() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 1).await;

        assert!(h.storefront.favorites.add(user, widget.id()).await.unwrap());
        assert!(!h.storefront.favorites.add(user, widget.id()).await.unwrap());
        assert_eq!(h.storefront.favorites.list(user).await.unwrap(), vec![widget.clone()]);

        h.storefront.favorites.remove(user, widget.id()).await.unwrap();
        assert!(h.storefront.favorites.list(user).await.unwrap().is_empty());
        assert!(matches!(h.storefront.favorites.remove(user, widget.id()).await, Err(CheckoutError::NotFound(Entity::Product))));
    }

    #[tokio::test]
    async fn test_unknown_product_cannot_be_favorited() {
        let h = Harness::new();
        assert!(matches!(
            h.storefront.favorites.add(UserId::new(), ProductId::new()).await,
            Err(CheckoutError::NotFound(Entity::Product))
        ));
    }
}
