//! In-process store and collaborators.
//!
//! All records sit behind one mutex, which makes every trait method atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use super::{PendingPayment, Store, StoreError};
use crate::domain::aggregates::{Address, Cart, Coupon, Order, Product};
use crate::domain::value_objects::{AddressId, CartId, CouponCode, OrderId, ProductId, UserId};
use crate::ports::{AddressBook, BackendError, Catalog};

#[derive(Default)]
struct State {
    carts: HashMap<CartId, Cart>,
    active: HashMap<UserId, CartId>,
    coupons: HashMap<CouponCode, Coupon>,
    pending: HashMap<String, PendingPayment>,
    orders: HashMap<OrderId, Order>,
    order_by_cart: HashMap<CartId, OrderId>,
    favorites: HashMap<UserId, Vec<ProductId>>,
}

impl State {
    fn checked_cart(&self, cart: &Cart, expected_version: u64) -> Result<(), StoreError> {
        match self.carts.get(&cart.id()) {
            Some(stored) if !stored.is_expired() && stored.version() == expected_version => Ok(()),
            _ => Err(StoreError::Conflict),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Coupons are administered elsewhere; this seeds or replaces one.
    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.state.lock().await.coupons.insert(coupon.code().clone(), coupon);
    }

    pub async fn cart(&self, id: CartId) -> Option<Cart> {
        self.state.lock().await.carts.get(&id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_cart(&self, user: UserId) -> Result<Option<Cart>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active.get(&user).and_then(|id| state.carts.get(id)).cloned())
    }

    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.active.contains_key(&cart.user_id()) || state.carts.contains_key(&cart.id()) {
            return Err(StoreError::Conflict);
        }
        state.active.insert(cart.user_id(), cart.id());
        state.carts.insert(cart.id(), cart.clone());
        Ok(())
    }

    async fn update_cart(&self, cart: &Cart, expected_version: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.checked_cart(cart, expected_version)?;
        state.carts.insert(cart.id(), cart.clone());
        Ok(())
    }

    async fn coupon(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        Ok(self.state.lock().await.coupons.get(code).cloned())
    }

    async fn attach_coupon(&self, cart: &Cart, expected_version: u64, code: &CouponCode, user: UserId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.checked_cart(cart, expected_version)?;
        let coupon = state.coupons.get_mut(code).ok_or_else(|| StoreError::Corrupt(format!("coupon {code} vanished")))?;
        if !coupon.record_use(user) { return Err(StoreError::Duplicate); }
        state.carts.insert(cart.id(), cart.clone());
        Ok(())
    }

    async fn detach_coupon(&self, cart: &Cart, expected_version: u64, code: &CouponCode, user: UserId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.checked_cart(cart, expected_version)?;
        if let Some(coupon) = state.coupons.get_mut(code) {
            coupon.release_use(user);
        }
        state.carts.insert(cart.id(), cart.clone());
        Ok(())
    }

    async fn save_pending_payment(&self, pending: &PendingPayment) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.pending.contains_key(&pending.intent.id) { return Err(StoreError::Duplicate); }
        state.pending.insert(pending.intent.id.clone(), pending.clone());
        Ok(())
    }

    async fn pending_payment(&self, intent_id: &str) -> Result<Option<PendingPayment>, StoreError> {
        Ok(self.state.lock().await.pending.get(intent_id).cloned())
    }

    async fn place_order(&self, order: &Order, expected_cart_version: Option<u64>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.order_by_cart.contains_key(&order.cart_id()) { return Err(StoreError::Duplicate); }
        if let Some(reference) = order.payment_reference() {
            if state.orders.values().any(|o| o.payment_reference() == Some(reference)) { return Err(StoreError::Duplicate); }
        }
        let mut cart = match state.carts.get(&order.cart_id()) {
            Some(cart) if !cart.is_expired() => cart.clone(),
            _ => return Err(StoreError::Conflict),
        };
        if expected_cart_version.is_some_and(|v| v != cart.version()) { return Err(StoreError::Conflict); }
        cart.retire().map_err(|_| StoreError::Conflict)?;

        state.active.remove(&cart.user_id());
        state.carts.insert(cart.id(), cart);
        state.pending.retain(|_, pending| pending.priced.cart_id != order.cart_id());
        state.order_by_cart.insert(order.cart_id(), order.id());
        state.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_for_payment(&self, payment_reference: &str) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.payment_reference() == Some(payment_reference)).cloned())
    }

    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().filter(|o| o.user_id() == user).cloned().collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| b.id().cmp(&a.id())));
        Ok(orders)
    }

    async fn mark_cancelled(&self, id: OrderId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.orders.get_mut(&id).ok_or(StoreError::Conflict)?.cancel();
        Ok(())
    }

    async fn favorites(&self, user: UserId) -> Result<Vec<ProductId>, StoreError> {
        Ok(self.state.lock().await.favorites.get(&user).cloned().unwrap_or_default())
    }

    async fn add_favorite(&self, user: UserId, product: ProductId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let list = state.favorites.entry(user).or_default();
        if list.contains(&product) { return Ok(false); }
        list.push(product);
        Ok(true)
    }

    async fn remove_favorite(&self, user: UserId, product: ProductId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(list) = state.favorites.get_mut(&user) else { return Ok(false) };
        let before = list.len();
        list.retain(|p| *p != product);
        Ok(list.len() < before)
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl MemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub async fn upsert(&self, product: Product) {
        self.products.write().await.insert(product.id(), product);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, BackendError> {
        Ok(self.products.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryAddressBook {
    addresses: RwLock<HashMap<(UserId, AddressId), Address>>,
}

impl MemoryAddressBook {
    pub fn new() -> Self { Self::default() }

    pub async fn insert(&self, user: UserId, address: Address) {
        self.addresses.write().await.insert((user, address.id), address);
    }
}

#[async_trait]
impl AddressBook for MemoryAddressBook {
    async fn address(&self, user: UserId, id: AddressId) -> Result<Option<Address>, BackendError> {
        Ok(self.addresses.read().await.get(&(user, id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{DiscountRule, PricedCart, Settlement};
    use crate::ports::PaymentIntent;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn product() -> Product { Product::new(ProductId::new(), "Widget", dec!(10), 5) }

    fn priced(cart: &Cart) -> PricedCart {
        PricedCart {
            cart_id: cart.id(), user_id: cart.user_id(), lines: cart.lines().to_vec(),
            grand_total: cart.grand_total(), coupon: None, discount: Decimal::ZERO, total: cart.grand_total(),
        }
    }

    #[tokio::test]
    async fn test_one_active_cart_per_user() {
        let store = MemoryStore::new();
        let user = UserId::new();
        store.insert_cart(&Cart::open(user)).await.unwrap();
        assert!(matches!(store.insert_cart(&Cart::open(user)).await, Err(StoreError::Conflict)));
        assert!(store.insert_cart(&Cart::open(UserId::new())).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryStore::new();
        let mut cart = Cart::open(UserId::new());
        store.insert_cart(&cart).await.unwrap();

        let p = product();
        let mut racer = cart.clone();
        cart.add_line(&p).unwrap();
        store.update_cart(&cart, 0).await.unwrap();

        racer.add_line(&p).unwrap();
        assert!(matches!(store.update_cart(&racer, 0).await, Err(StoreError::Conflict)));
        assert_eq!(store.cart(cart.id()).await.unwrap(), cart);
    }

    #[tokio::test]
    async fn test_attach_coupon_is_all_or_nothing() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let code = CouponCode::new("TEN").unwrap();
        store.insert_coupon(Coupon::new(code.clone(), DiscountRule::FixedAmount(dec!(1)), Decimal::ZERO, Utc::now() + Duration::days(1))).await;

        let mut cart = Cart::open(user);
        store.insert_cart(&cart).await.unwrap();
        cart.attach_coupon(code.clone()).unwrap();

        // wrong version: neither the cart nor the coupon changes
        assert!(matches!(store.attach_coupon(&cart, 7, &code, user).await, Err(StoreError::Conflict)));
        assert!(!store.coupon(&code).await.unwrap().unwrap().is_used_by(user));
        assert_eq!(store.active_cart(user).await.unwrap().unwrap().coupon(), None);

        store.attach_coupon(&cart, 0, &code, user).await.unwrap();
        assert!(store.coupon(&code).await.unwrap().unwrap().is_used_by(user));
        assert_eq!(store.active_cart(user).await.unwrap().unwrap().coupon(), Some(&code));
    }

    #[tokio::test]
    async fn test_place_order_retires_cart_once() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let mut cart = Cart::open(user);
        store.insert_cart(&cart).await.unwrap();
        cart.add_line(&product()).unwrap();
        store.update_cart(&cart, 0).await.unwrap();

        let order = Order::place(priced(&cart), Address::default(), Settlement::Cash);
        assert!(matches!(store.place_order(&order, Some(0)).await, Err(StoreError::Conflict)));
        store.place_order(&order, Some(cart.version())).await.unwrap();

        assert!(store.active_cart(user).await.unwrap().is_none());
        assert!(store.cart(cart.id()).await.unwrap().is_expired());
        let again = Order::place(priced(&cart), Address::default(), Settlement::Cash);
        assert!(matches!(store.place_order(&again, None).await, Err(StoreError::Duplicate)));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_place_order_discards_pending_payments() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let mut cart = Cart::open(user);
        store.insert_cart(&cart).await.unwrap();
        cart.add_line(&product()).unwrap();
        store.update_cart(&cart, 0).await.unwrap();

        let pending = PendingPayment {
            intent: PaymentIntent { id: "pi_1".into(), amount: cart.grand_total(), reference: cart.id().to_string() },
            priced: priced(&cart),
            address: Address::default(),
            cart_version: cart.version(),
            created_at: Utc::now(),
        };
        store.save_pending_payment(&pending).await.unwrap();
        assert!(matches!(store.save_pending_payment(&pending).await, Err(StoreError::Duplicate)));

        let order = Order::place(priced(&cart), Address::default(), Settlement::Gateway { payment_reference: "pay_1".into() });
        store.place_order(&order, Some(pending.cart_version)).await.unwrap();
        assert_eq!(store.pending_payment("pi_1").await.unwrap(), None);
        assert_eq!(store.order_for_payment("pay_1").await.unwrap().map(|o| o.id()), Some(order.id()));
        assert_eq!(store.order_for_payment("pay_2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_history_breaks_timestamp_ties_by_id() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let created_at = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut cart = Cart::open(user);
            store.insert_cart(&cart).await.unwrap();
            cart.add_line(&product()).unwrap();
            store.update_cart(&cart, 0).await.unwrap();
            let mut order = Order::place(priced(&cart), Address::default(), Settlement::Cash);
            order.created_at = created_at;
            store.place_order(&order, None).await.unwrap();
            ids.push(order.id());
        }
        ids.sort_by(|a, b| b.cmp(a));

        let history: Vec<OrderId> = store.orders_for_user(user).await.unwrap().iter().map(Order::id).collect();
        assert_eq!(history, ids);
    }

    #[tokio::test]
    async fn test_favorites() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let p = ProductId::new();
        assert!(store.add_favorite(user, p).await.unwrap());
        assert!(!store.add_favorite(user, p).await.unwrap());
        assert_eq!(store.favorites(user).await.unwrap(), vec![p]);
        assert!(store.remove_favorite(user, p).await.unwrap());
        assert!(!store.remove_favorite(user, p).await.unwrap());
    }
}
