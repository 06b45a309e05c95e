//! Postgres-backed store and collaborators.
//!
//! Cart writes are compare-and-swap on the `version` column; the two-record
//! writes run inside a transaction. Uniqueness (one active cart per user, one
//! redemption per user and coupon, one order per cart) is enforced by indexes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPool, types::Json, PgExecutor};
use std::collections::HashSet;

use super::{PendingPayment, Store, StoreError};
use crate::domain::aggregates::{Address, Cart, Coupon, DiscountRule, LineItem, Order, OrderStatus, Product};
use crate::domain::value_objects::{AddressId, CartId, CouponCode, OrderId, ProductId, UserId};
use crate::ports::{AddressBook, BackendError, Catalog};

#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    user_id: UserId,
    lines: Json<Vec<LineItem>>,
    grand_total: Decimal,
    coupon_code: Option<String>,
    expired: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = StoreError;
    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        Ok(Cart {
            id: row.id,
            user_id: row.user_id,
            lines: row.lines.0,
            grand_total: row.grand_total,
            coupon: row.coupon_code.map(parse_code).transpose()?,
            expired: row.expired,
            version: u64::try_from(row.version).map_err(|_| StoreError::Corrupt(format!("cart {} has negative version", row.id)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    code: String,
    rule_kind: String,
    rule_value: Decimal,
    min_amount: Decimal,
    expires_at: DateTime<Utc>,
    deactivated: bool,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    cart_id: CartId,
    address: Json<Address>,
    payment_method: String,
    payment_reference: Option<String>,
    status: String,
    lines: Json<Vec<LineItem>>,
    grand_total: Decimal,
    coupon_code: Option<String>,
    discount: Decimal,
    final_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            cart_id: row.cart_id,
            address: row.address.0,
            payment_method: row.payment_method.parse().map_err(StoreError::Corrupt)?,
            payment_reference: row.payment_reference,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            lines: row.lines.0,
            grand_total: row.grand_total,
            coupon: row.coupon_code.map(parse_code).transpose()?,
            discount: row.discount,
            final_amount: row.final_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, cart_id, address, payment_method, payment_reference, status, lines, \
     grand_total, coupon_code, discount, final_amount, created_at, updated_at";

fn parse_code(raw: String) -> Result<CouponCode, StoreError> {
    CouponCode::new(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn rule_from_columns(kind: &str, value: Decimal) -> Result<DiscountRule, StoreError> {
    match kind {
        "none" => Ok(DiscountRule::None),
        "percentage" => Ok(DiscountRule::Percentage(value)),
        "fixed_amount" => Ok(DiscountRule::FixedAmount(value)),
        other => Err(StoreError::Corrupt(format!("unknown discount rule {other:?}"))),
    }
}

fn version_param(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

/// Maps a unique-constraint violation to `on_unique`.
fn unique_violation(err: sqlx::Error, on_unique: StoreError) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => on_unique,
        _ => StoreError::Database(err),
    }
}

async fn write_cart<'c, E: PgExecutor<'c>>(executor: E, cart: &Cart, expected_version: u64) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE carts SET lines = $3, grand_total = $4, coupon_code = $5, version = $6, updated_at = $7 \
         WHERE id = $1 AND version = $2 AND NOT expired",
    )
    .bind(cart.id())
    .bind(version_param(expected_version))
    .bind(Json(cart.lines()))
    .bind(cart.grand_total())
    .bind(cart.coupon().map(CouponCode::as_str))
    .bind(version_param(cart.version()))
    .bind(cart.updated_at())
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 { return Err(StoreError::Conflict); }
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn active_cart(&self, user: UserId) -> Result<Option<Cart>, StoreError> {
        sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE user_id = $1 AND NOT expired")
            .bind(user)
            .fetch_optional(&self.pool)
            .await?
            .map(Cart::try_from)
            .transpose()
    }

    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO carts (id, user_id, lines, grand_total, coupon_code, expired, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8)",
        )
        .bind(cart.id())
        .bind(cart.user_id())
        .bind(Json(cart.lines()))
        .bind(cart.grand_total())
        .bind(cart.coupon().map(CouponCode::as_str))
        .bind(version_param(cart.version()))
        .bind(cart.created_at())
        .bind(cart.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, StoreError::Conflict))?;
        Ok(())
    }

    async fn update_cart(&self, cart: &Cart, expected_version: u64) -> Result<(), StoreError> {
        write_cart(&self.pool, cart, expected_version).await
    }

    async fn coupon(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        let Some(row) = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let used_by: Vec<(UserId,)> = sqlx::query_as("SELECT user_id FROM coupon_redemptions WHERE code = $1")
            .bind(code)
            .fetch_all(&self.pool)
            .await?;
        Ok(Some(Coupon {
            code: parse_code(row.code)?,
            rule: rule_from_columns(&row.rule_kind, row.rule_value)?,
            min_amount: row.min_amount,
            expires_at: row.expires_at,
            deactivated: row.deactivated,
            used_by: used_by.into_iter().map(|(u,)| u).collect::<HashSet<_>>(),
        }))
    }

    async fn attach_coupon(&self, cart: &Cart, expected_version: u64, code: &CouponCode, user: UserId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_cart(&mut *tx, cart, expected_version).await?;
        sqlx::query("INSERT INTO coupon_redemptions (code, user_id) VALUES ($1, $2)")
            .bind(code)
            .bind(user)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_violation(e, StoreError::Duplicate))?;
        tx.commit().await?;
        Ok(())
    }

    async fn detach_coupon(&self, cart: &Cart, expected_version: u64, code: &CouponCode, user: UserId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_cart(&mut *tx, cart, expected_version).await?;
        sqlx::query("DELETE FROM coupon_redemptions WHERE code = $1 AND user_id = $2")
            .bind(code)
            .bind(user)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_pending_payment(&self, pending: &PendingPayment) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO pending_payments (intent_id, cart_id, user_id, body, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(&pending.intent.id)
            .bind(pending.priced.cart_id)
            .bind(pending.priced.user_id)
            .bind(Json(pending))
            .bind(pending.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| unique_violation(e, StoreError::Duplicate))?;
        Ok(())
    }

    async fn pending_payment(&self, intent_id: &str) -> Result<Option<PendingPayment>, StoreError> {
        let row: Option<(Json<PendingPayment>,)> = sqlx::query_as("SELECT body FROM pending_payments WHERE intent_id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(body,)| body.0))
    }

    async fn place_order(&self, order: &Order, expected_cart_version: Option<u64>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO orders (id, user_id, cart_id, address, payment_method, payment_reference, status, lines, \
             grand_total, coupon_code, discount, final_amount, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id())
        .bind(order.user_id())
        .bind(order.cart_id())
        .bind(Json(order.address()))
        .bind(order.payment_method().as_str())
        .bind(order.payment_reference())
        .bind(order.status().as_str())
        .bind(Json(order.lines()))
        .bind(order.grand_total())
        .bind(order.coupon().map(CouponCode::as_str))
        .bind(order.discount())
        .bind(order.final_amount())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, StoreError::Duplicate))?;

        let retired = sqlx::query(
            "UPDATE carts SET expired = TRUE, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND NOT expired AND ($2::BIGINT IS NULL OR version = $2)",
        )
        .bind(order.cart_id())
        .bind(expected_cart_version.map(version_param))
        .execute(&mut *tx)
        .await?;
        if retired.rows_affected() == 0 { return Err(StoreError::Conflict); }

        sqlx::query("DELETE FROM pending_payments WHERE cart_id = $1")
            .bind(order.cart_id())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn order_for_payment(&self, payment_reference: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_reference = $1"))
            .bind(payment_reference)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"))
            .bind(user)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn mark_cancelled(&self, id: OrderId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(OrderStatus::Cancelled.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 { return Err(StoreError::Conflict); }
        Ok(())
    }

    async fn favorites(&self, user: UserId) -> Result<Vec<ProductId>, StoreError> {
        let rows: Vec<(ProductId,)> = sqlx::query_as("SELECT product_id FROM favorites WHERE user_id = $1 ORDER BY created_at")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn add_favorite(&self, user: UserId, product: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO favorites (user_id, product_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user)
            .bind(product)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_favorite(&self, user: UserId, product: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND product_id = $2")
            .bind(user)
            .bind(product)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, BackendError> {
        let row: Option<(String, Decimal, i32)> =
            sqlx::query_as("SELECT name, price, inventory_quantity FROM products WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(name, price, stock)| Product::new(id, name, price, u32::try_from(stock).unwrap_or(0))))
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: AddressId,
    name: String,
    line1: String,
    line2: Option<String>,
    city: String,
    state: Option<String>,
    postal_code: String,
    country: String,
    phone: Option<String>,
}

#[derive(Clone)]
pub struct PgAddressBook {
    pool: PgPool,
}

impl PgAddressBook {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl AddressBook for PgAddressBook {
    async fn address(&self, user: UserId, id: AddressId) -> Result<Option<Address>, BackendError> {
        let row = sqlx::query_as::<_, AddressRow>(
            "SELECT id, name, line1, line2, city, state, postal_code, country, phone \
             FROM addresses WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Address {
            id: r.id, name: r.name, line1: r.line1, line2: r.line2, city: r.city,
            state: r.state, postal_code: r.postal_code, country: r.country, phone: r.phone,
        }))
    }
}
