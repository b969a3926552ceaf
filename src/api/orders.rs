//! `/orders` handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;
use crate::api::dto::{ApiResponse, ListParams, OrderList, OrderView, Pagination, PaymentView};
use crate::api::error::ApiError;
use crate::api::extract::Owner;
use crate::api::AppState;
use crate::domain::value_objects::{OrderId, OrderNumber};
use crate::ports::Page;

pub async fn list(State(s): State<AppState>, Owner(owner): Owner, Query(p): Query<ListParams>) -> Result<Json<OrderList>, ApiError> {
    let page = Page::new(p.page, p.limit);
    let (orders, total) = s.checkout.list_orders(owner, page).await?;
    let pages = total.div_ceil(u64::from(page.per_page));
    Ok(Json(OrderList {
        success: true,
        data: orders.iter().map(OrderView::from).collect(),
        pagination: Pagination { page: page.page, limit: page.per_page, total, pages },
    }))
}

pub async fn get(State(s): State<AppState>, Owner(owner): Owner, Path(id): Path<Uuid>) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let order = s.checkout.owned_order(owner, OrderId::from(id)).await?;
    Ok(Json(ApiResponse::ok(OrderView::from(&order))))
}

pub async fn by_number(State(s): State<AppState>, Owner(owner): Owner, Path(number): Path<String>) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let order = s.checkout.order_by_number(owner, &OrderNumber::parse(number)).await?;
    Ok(Json(ApiResponse::ok(OrderView::from(&order))))
}

pub async fn payment(State(s): State<AppState>, Owner(owner): Owner, Path(id): Path<Uuid>) -> Result<Json<ApiResponse<PaymentView>>, ApiError> {
    let order = s.checkout.owned_order(owner, OrderId::from(id)).await?;
    Ok(Json(ApiResponse::ok(PaymentView::from(&order))))
}

pub async fn cancel(State(s): State<AppState>, Owner(owner): Owner, Path(id): Path<Uuid>) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let order = s.checkout.cancel(owner, OrderId::from(id)).await?;
    Ok(Json(ApiResponse::with_message("Order cancelled successfully", OrderView::from(&order))))
}
