//! HTTP surface.
//!
//! The acting user is a path segment; authentication happens in front of
//! this service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};
use validator::Validate;

use crate::domain::aggregates::{Order, PaymentMethod, Product};
use crate::domain::value_objects::{AddressId, CouponCode, OrderId, ProductId, UserId};
use crate::ports::GatewayResponse;
use crate::services::{AddItemOutcome, CartSummary, CheckoutOutcome, Storefront};
use crate::CheckoutError;

#[derive(Clone)]
pub struct AppState {
    pub storefront: Arc<Storefront>,
}

impl CheckoutError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfStock { .. } | Self::InvalidState(_) | Self::Conflict => StatusCode::CONFLICT,
            Self::CouponExpired
            | Self::CouponDeactivated
            | Self::CouponAlreadyUsed
            | Self::CouponMinAmountNotMet { .. }
            | Self::CouponMinAmountViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PaymentVerificationFailed => StatusCode::PAYMENT_REQUIRED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                error!(%detail, "request failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (self.status_code(), Json(json!({ "error": self.kind(), "message": message }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("invalid request: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Checkout(e) => e.into_response(),
            Self::Validation(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": "validation", "message": e.to_string() }))).into_response(),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad_request", "message": message }))).into_response(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(storefront: Arc<Storefront>) -> Router {
    let api = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront-checkout"})) }))
        .route("/users/:user/cart", get(view_cart))
        .route("/users/:user/cart/items/:product", post(add_item).delete(remove_item))
        .route("/users/:user/cart/items/:product/increment", post(increment_item))
        .route("/users/:user/cart/items/:product/decrement", post(decrement_item))
        .route("/users/:user/cart/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/users/:user/checkout", post(initiate_checkout))
        .route("/users/:user/orders", get(orders_for_user))
        .route("/users/:user/favorites", get(list_favorites))
        .route("/users/:user/favorites/:product", post(add_favorite).delete(remove_favorite))
        .route("/payments/confirm", post(confirm_payment))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { storefront })
}

async fn view_cart(State(s): State<AppState>, Path(user): Path<UserId>) -> Json<CartSummary> {
    match s.storefront.view_cart(user).await {
        Ok(cart) => Json(cart),
        Err(e) => {
            warn!(%user, error = %e, "cart view failed, showing an empty cart");
            Json(CartSummary::empty())
        }
    }
}

async fn add_item(State(s): State<AppState>, Path((user, product)): Path<(UserId, ProductId)>) -> ApiResult<(StatusCode, Json<AddItemOutcome>)> {
    let outcome = s.storefront.add_item(user, product).await?;
    let status = match outcome {
        AddItemOutcome::Added(_) => StatusCode::CREATED,
        AddItemOutcome::AlreadyInCart(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn increment_item(State(s): State<AppState>, Path((user, product)): Path<(UserId, ProductId)>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.storefront.increment_item(user, product).await?))
}

async fn decrement_item(State(s): State<AppState>, Path((user, product)): Path<(UserId, ProductId)>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.storefront.decrement_item(user, product).await?))
}

async fn remove_item(State(s): State<AppState>, Path((user, product)): Path<(UserId, ProductId)>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.storefront.remove_item(user, product).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
}

async fn apply_coupon(State(s): State<AppState>, Path(user): Path<UserId>, Json(r): Json<ApplyCouponRequest>) -> ApiResult<Json<CartSummary>> {
    r.validate()?;
    let code = CouponCode::new(r.code).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(s.storefront.apply_coupon(user, &code).await?))
}

async fn remove_coupon(State(s): State<AppState>, Path(user): Path<UserId>) -> ApiResult<Json<CartSummary>> {
    Ok(Json(s.storefront.remove_coupon(user).await?))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub address_id: AddressId,
    pub payment_method: PaymentMethod,
}

async fn initiate_checkout(State(s): State<AppState>, Path(user): Path<UserId>, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<CheckoutOutcome>)> {
    let outcome = s.storefront.initiate_checkout(user, r.address_id, r.payment_method).await?;
    let status = match outcome {
        CheckoutOutcome::OrderPlaced { .. } => StatusCode::CREATED,
        CheckoutOutcome::AwaitingPayment { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

async fn confirm_payment(State(s): State<AppState>, Json(r): Json<GatewayResponse>) -> ApiResult<Json<Order>> {
    r.validate()?;
    Ok(Json(s.storefront.confirm_payment(&r).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<OrderId>) -> ApiResult<Json<Order>> {
    Ok(Json(s.storefront.order(id).await?))
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<OrderId>) -> ApiResult<Json<Order>> {
    Ok(Json(s.storefront.cancel_order(id).await?))
}

async fn orders_for_user(State(s): State<AppState>, Path(user): Path<UserId>) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.storefront.orders_for_user(user).await?))
}

async fn list_favorites(State(s): State<AppState>, Path(user): Path<UserId>) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(s.storefront.favorites.list(user).await?))
}

async fn add_favorite(State(s): State<AppState>, Path((user, product)): Path<(UserId, ProductId)>) -> ApiResult<StatusCode> {
    let added = s.storefront.favorites.add(user, product).await?;
    Ok(if added { StatusCode::CREATED } else { StatusCode::OK })
}

async fn remove_favorite(State(s): State<AppState>, Path((user, product)): Path<(UserId, ProductId)>) -> ApiResult<StatusCode> {
    s.storefront.favorites.remove(user, product).await?;
    Ok(StatusCode::NO_CONTENT)
}
