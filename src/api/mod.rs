//! HTTP surface: axum router, per-owner rate limiting and the handlers.

pub mod cart;
pub mod dto;
pub mod error;
pub mod extract;
pub mod orders;
pub mod payment;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use crate::config::CheckoutConfig;
use crate::error::EcommerceError;
use crate::infrastructure::WebhookVerifier;
use crate::ports::{CartStore, CatalogLookup, Notifier, OrderStore, PaymentGateway, RateDecision, RateLimiter};
use crate::services::{CartService, CheckoutService, Notifications, PaymentService};
use self::error::ApiError;
use self::extract::Owner;

pub const SERVICE_NAME: &str = "cozy-commerce";

/// Adapters chosen at start-up.
#[derive(Clone)]
pub struct Backends {
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub catalog: Arc<dyn CatalogLookup>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub webhook: Option<Arc<WebhookVerifier>>,
    pub currency: String,
}

impl AppState {
    pub fn new(backends: Backends, checkout: CheckoutConfig, webhook: Option<WebhookVerifier>) -> Self {
        let notifications = Notifications::new(backends.notifier);
        let currency = checkout.currency.clone();
        Self {
            carts: CartService::new(backends.carts.clone(), backends.orders.clone(), backends.catalog, notifications.clone()),
            payments: PaymentService::new(backends.carts.clone(), backends.orders.clone(), backends.gateway.clone(), notifications.clone(), currency.clone()),
            checkout: CheckoutService::new(backends.carts, backends.orders, backends.gateway, notifications, checkout),
            rate_limiter: backends.rate_limiter,
            webhook: webhook.map(Arc::new),
            currency,
        }
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let cart_routes = Router::new()
        .route("/cart", get(cart::get_cart).delete(cart::clear))
        .route("/cart/add", post(cart::add_item))
        .route("/cart/update", put(cart::update_item))
        .route("/cart/remove", delete(cart::remove_item))
        .route("/cart/clear", delete(cart::clear))
        .route("/cart/history", get(cart::history))
        .route("/cart/checkout", post(cart::checkout))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let api = Router::new()
        .merge(cart_routes)
        .route("/orders", get(orders::list))
        .route("/orders/:id", get(orders::get))
        .route("/orders/number/:order_number", get(orders::by_number))
        .route("/orders/:id/payment", get(orders::payment))
        .route("/orders/:id/cancel", post(orders::cancel))
        .route("/payment/create-intent", post(payment::create_intent))
        .route("/payment/verify", post(payment::verify))
        .route("/payment/webhook", post(payment::webhook));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": SERVICE_NAME})) }))
        .nest("/api/v1", api)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn rate_limit(State(s): State<AppState>, Owner(owner): Owner, request: Request, next: Next) -> Result<Response, ApiError> {
    match s.rate_limiter.hit(&format!("cart:{owner}")).await {
        Ok(RateDecision::Allowed { .. }) => Ok(next.run(request).await),
        Ok(RateDecision::Limited { retry_after_secs }) => {
            tracing::info!(%owner, retry_after_secs, "cart rate limit exceeded");
            Err(EcommerceError::RateLimited { retry_after_secs }.into())
        }
        Err(e) => {
            tracing::warn!(error = %e, "rate limiter unavailable, allowing request");
            Ok(next.run(request).await)
        }
    }
}
