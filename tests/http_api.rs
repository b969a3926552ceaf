mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use common::{Harness, UnavailableLimiter, WEBHOOK_SECRET};
use cozy_commerce::api;
use cozy_commerce::domain::value_objects::OwnerId;
use cozy_commerce::ports::IntentStatus;
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(h: &Harness, ops_per_minute: u32) -> Router {
    api::router(h.app_state(ops_per_minute), Duration::from_secs(5))
}

async fn call(app: &Router, method: &str, uri: &str, owner: Option<OwnerId>, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        request = request.header("x-user-id", owner.to_string());
    }
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, headers, value)
}

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new();
    let (status, _, body) = call(&app(&h, 30), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn identity_is_required() {
    let h = Harness::new();
    let app = app(&h, 30);
    let (status, _, body) = call(&app, "GET", "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let request = Request::builder().uri("/api/v1/orders").header("x-user-id", "not-a-uuid").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cart_endpoints_return_summaries() {
    let h = Harness::new();
    let app = app(&h, 30);
    let owner = OwnerId::new();
    let product = h.product(dec!(10.00)).await;

    let (status, _, body) = call(&app, "GET", "/api/v1/cart", Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["canModify"], true);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 0);

    let add = json!({ "productId": product.to_string(), "quantity": 2 });
    let (status, _, body) = call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(add)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalItems"], 2);
    assert_eq!(body["data"]["totalAmount"], "20.00");
    assert_eq!(body["data"]["items"][0]["variant"], Value::Null);

    let update = json!({ "productId": product.to_string(), "quantity": 3, "variant": null });
    let (_, _, body) = call(&app, "PUT", "/api/v1/cart/update", Some(owner), Some(update)).await;
    assert_eq!(body["data"]["totalAmount"], "30.00");

    let remove = json!({ "productId": product.to_string() });
    let (status, _, body) = call(&app, "DELETE", "/api/v1/cart/remove", Some(owner), Some(remove.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalItems"], 0);

    let (status, _, body) = call(&app, "DELETE", "/api/v1/cart/remove", Some(owner), Some(remove)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ITEM_NOT_FOUND");

    let (status, _, body) = call(&app, "DELETE", "/api/v1/cart/clear", Some(owner), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EMPTY_CART");
}

#[tokio::test]
async fn request_validation() {
    let h = Harness::new();
    let app = app(&h, 30);
    let owner = OwnerId::new();
    let product = h.product(dec!(1.00)).await;

    let (status, _, body) = call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "productId": product.to_string(), "quantity": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert!(body["errors"]["quantity"].is_array());

    let (status, _, _) = call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "quantity": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "productId": OwnerId::new().to_string() }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PRODUCT_NOT_FOUND");

    let (status, _, _) = call(&app, "POST", "/api/v1/cart/checkout", Some(owner), Some(json!({ "shippingCost": "lots" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_and_pay_over_http() {
    let h = Harness::new();
    let app = app(&h, 30);
    let owner = OwnerId::new();
    let product = h.product(dec!(10.00)).await;
    call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "productId": product.to_string(), "quantity": 2 }))).await;

    let (status, _, body) = call(&app, "POST", "/api/v1/cart/checkout", Some(owner), Some(json!({ "shippingCost": 5 }))).await;
    assert_eq!(status, StatusCode::OK);
    let order = &body["data"]["order"];
    assert_eq!(order["subtotal"], "20.00");
    assert_eq!(order["tax"], "1.60");
    assert_eq!(order["totalAmount"], "26.60");
    assert_eq!(body["data"]["cart"]["status"], "processing");
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, _, body) = call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "productId": product.to_string() }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CART_NOT_MODIFIABLE");
    assert_eq!(body["cartStatus"], "processing");
    assert!(body["suggestion"].is_string());

    let (_, _, body) = call(&app, "POST", "/api/v1/cart/checkout", Some(owner), None).await;
    assert_eq!(body["data"]["order"]["id"], order_id.as_str());
    assert_eq!(body["data"]["resumed"], true);

    let (status, _, body) = call(&app, "POST", "/api/v1/payment/create-intent", Some(owner), Some(json!({ "orderId": order_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["breakdown"]["total"], "26.60");
    assert_eq!(body["data"]["currency"], "usd");
    assert!(body["data"]["clientSecret"].as_str().unwrap().contains("_secret_"));
    let intent = body["data"]["paymentIntentId"].as_str().unwrap().to_string();

    let (_, _, body) = call(&app, "GET", &format!("/api/v1/orders/{order_id}/payment"), Some(owner), None).await;
    assert_eq!(body["data"]["paymentStatus"], "processing");
    assert_eq!(body["data"]["canPay"], true);

    let (status, _, body) = call(&app, "POST", "/api/v1/payment/verify", Some(owner), Some(json!({ "paymentIntentId": intent }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["paymentStatus"], "requires_payment_method");
    assert_eq!(body["redirectUrl"], "/payment/failed");

    h.gateway.set_status(&intent, IntentStatus::Succeeded).await;
    let (status, _, body) = call(&app, "POST", "/api/v1/payment/verify", Some(owner), Some(json!({ "paymentIntentId": intent }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["paymentStatus"], "completed");
    assert_eq!(body["order"]["orderStatus"], "processing");
    let number = body["order"]["orderNumber"].as_str().unwrap().to_string();
    assert_eq!(body["redirectUrl"], format!("/order-confirmation?orderId={number}"));

    let (_, _, body) = call(&app, "GET", "/api/v1/cart/history", Some(owner), None).await;
    assert_eq!(body["data"][0]["status"], "completed");
    let (_, _, body) = call(&app, "GET", &format!("/api/v1/orders/number/{number}"), Some(owner), None).await;
    assert_eq!(body["data"]["id"], order_id.as_str());
    let (status, _, _) = call(&app, "POST", "/api/v1/payment/create-intent", Some(OwnerId::new()), Some(json!({ "orderId": order_id }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn orders_are_listed_and_cancelled() {
    let h = Harness::new();
    let app = app(&h, 30);
    let owner = OwnerId::new();
    let product = h.product(dec!(3.00)).await;
    call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "productId": product.to_string() }))).await;
    let (_, _, body) = call(&app, "POST", "/api/v1/cart/checkout", Some(owner), None).await;
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = call(&app, "GET", "/api/v1/orders?page=1&limit=5", Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["pagination"]["limit"], 5);
    assert_eq!(body["data"][0]["id"], order_id.as_str());

    let (status, _, _) = call(&app, "GET", &format!("/api/v1/orders/{order_id}"), Some(OwnerId::new()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/api/v1/orders/{order_id}/cancel");
    let (status, _, body) = call(&app, "POST", &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["orderStatus"], "cancelled");
    let (status, _, body) = call(&app, "POST", &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ALREADY_CANCELLED");
}

#[tokio::test]
async fn cart_routes_are_rate_limited_per_owner() {
    let h = Harness::new();
    let app = app(&h, 2);
    let owner = OwnerId::new();
    for _ in 0..2 {
        let (status, _, _) = call(&app, "GET", "/api/v1/cart", Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = call(&app, "GET", "/api/v1/cart", Some(owner), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
    assert!(headers.contains_key(header::RETRY_AFTER));

    let (status, _, _) = call(&app, "GET", "/api/v1/cart", Some(OwnerId::new()), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = call(&app, "GET", "/api/v1/orders", Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
}

fn signature(body: &str, t: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{t}.{body}").as_bytes());
    format!("t={t},v1={}", hex::encode(mac.finalize().into_bytes()))
}

async fn post_webhook(app: &Router, body: &str, signature: Option<String>) -> StatusCode {
    let mut request = Request::builder().method("POST").uri("/api/v1/payment/webhook");
    if let Some(sig) = signature {
        request = request.header("stripe-signature", sig);
    }
    app.clone().oneshot(request.body(Body::from(body.to_string())).unwrap()).await.unwrap().status()
}

#[tokio::test]
async fn signed_webhooks_reconcile_payments() {
    let h = Harness::new();
    let app = app(&h, 30);
    let owner = OwnerId::new();
    let product = h.product(dec!(3.00)).await;
    call(&app, "POST", "/api/v1/cart/add", Some(owner), Some(json!({ "productId": product.to_string() }))).await;
    let (_, _, body) = call(&app, "POST", "/api/v1/cart/checkout", Some(owner), None).await;
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();
    let (_, _, body) = call(&app, "POST", "/api/v1/payment/create-intent", Some(owner), Some(json!({ "orderId": order_id }))).await;
    let intent = body["data"]["paymentIntentId"].as_str().unwrap().to_string();
    h.gateway.set_status(&intent, IntentStatus::Succeeded).await;

    let event = json!({ "type": "payment_intent.succeeded", "data": { "object": { "id": intent } } }).to_string();
    assert_eq!(post_webhook(&app, &event, None).await, StatusCode::BAD_REQUEST);
    assert_eq!(post_webhook(&app, &event, Some(signature(&event, 1))).await, StatusCode::BAD_REQUEST);
    let now = chrono::Utc::now().timestamp();
    assert_eq!(post_webhook(&app, &event, Some(signature(&event, now))).await, StatusCode::OK);

    let (_, _, body) = call(&app, "GET", &format!("/api/v1/orders/{order_id}/payment"), Some(owner), None).await;
    assert_eq!(body["data"]["paymentStatus"], "completed");
    assert_eq!(body["data"]["canPay"], false);
}

#[tokio::test]
async fn cart_routes_stay_open_when_the_limiter_is_down() {
    let h = Harness::new();
    let app = api::router(h.app_state_with(Arc::new(UnavailableLimiter)), Duration::from_secs(5));
    let owner = OwnerId::new();
    for _ in 0..3 {
        let (status, headers, body) = call(&app, "GET", "/api/v1/cart", Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::RETRY_AFTER).is_none());
        assert_eq!(body["success"], true);
    }
}
