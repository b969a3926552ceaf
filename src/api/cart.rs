//! `/cart` handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use crate::api::dto::{variant, AddItemRequest, ApiResponse, CartView, CheckoutBody, CheckoutView, OrderView, RemoveItemRequest, UpdateItemRequest};
use crate::api::error::ApiError;
use crate::api::extract::{Owner, ValidatedJson};
use crate::api::AppState;
use crate::domain::value_objects::{Money, OrderId, ProductRef};
use crate::services::CheckoutRequest;

type CartResponse = Result<Json<ApiResponse<CartView>>, ApiError>;

pub async fn get_cart(State(s): State<AppState>, Owner(owner): Owner) -> CartResponse {
    let cart = s.carts.get_or_create_cart(owner).await?;
    Ok(Json(ApiResponse::ok(CartView::from(&cart))))
}

pub async fn history(State(s): State<AppState>, Owner(owner): Owner) -> Result<Json<ApiResponse<Vec<CartView>>>, ApiError> {
    let carts = s.carts.history(owner).await?;
    Ok(Json(ApiResponse::ok(carts.iter().map(CartView::from).collect())))
}

pub async fn add_item(State(s): State<AppState>, Owner(owner): Owner, ValidatedJson(r): ValidatedJson<AddItemRequest>) -> CartResponse {
    let cart = s.carts.add_item(owner, ProductRef::from(r.product_id), r.quantity.unwrap_or(1), variant(r.variant)).await?;
    Ok(Json(ApiResponse::with_message("Item added to cart successfully", CartView::from(&cart))))
}

pub async fn update_item(State(s): State<AppState>, Owner(owner): Owner, ValidatedJson(r): ValidatedJson<UpdateItemRequest>) -> CartResponse {
    let cart = s.carts.update_quantity(owner, ProductRef::from(r.product_id), r.quantity, variant(r.variant)).await?;
    Ok(Json(ApiResponse::with_message("Cart updated successfully", CartView::from(&cart))))
}

pub async fn remove_item(State(s): State<AppState>, Owner(owner): Owner, ValidatedJson(r): ValidatedJson<RemoveItemRequest>) -> CartResponse {
    let cart = s.carts.remove_item(owner, ProductRef::from(r.product_id), variant(r.variant)).await?;
    Ok(Json(ApiResponse::with_message("Item removed from cart", CartView::from(&cart))))
}

pub async fn clear(State(s): State<AppState>, Owner(owner): Owner) -> CartResponse {
    let cart = s.carts.clear(owner).await?;
    Ok(Json(ApiResponse::with_message("Cart cleared successfully", CartView::from(&cart))))
}

/// Body is optional; an empty request checks out with zero shipping.
pub async fn checkout(State(s): State<AppState>, Owner(owner): Owner, raw: Bytes) -> Result<Json<ApiResponse<CheckoutView>>, ApiError> {
    let body: CheckoutBody = if raw.iter().all(u8::is_ascii_whitespace) {
        CheckoutBody::default()
    } else {
        serde_json::from_slice(&raw).map_err(|e| ApiError::BadRequest(format!("invalid checkout body: {e}")))?
    };
    let request = CheckoutRequest {
        shipping_cost: body.shipping_cost.map(Money::new),
        shipping_address: body.shipping_address,
        order_hint: body.order_id.map(OrderId::from),
    };
    let outcome = s.checkout.checkout(owner, request).await?;
    let message = if outcome.resumed { "Existing order retrieved" } else { "Order created successfully" };
    Ok(Json(ApiResponse::with_message(message, CheckoutView {
        order: OrderView::from(&outcome.order), cart: CartView::from(&outcome.cart), resumed: outcome.resumed,
    })))
}
