//! `/payment` handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use crate::api::dto::{ApiResponse, CreateIntentRequest, IntentView, VerifyRequest, VerifyView};
use crate::api::error::ApiError;
use crate::api::extract::{Owner, ValidatedJson};
use crate::api::AppState;
use crate::domain::value_objects::OrderId;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn create_intent(State(s): State<AppState>, Owner(owner): Owner, ValidatedJson(r): ValidatedJson<CreateIntentRequest>) -> Result<Json<ApiResponse<IntentView>>, ApiError> {
    let grant = s.payments.create_or_retrieve_intent(owner, OrderId::from(r.order_id)).await?;
    Ok(Json(ApiResponse::ok(IntentView::new(grant, &s.currency))))
}

/// 200 when the gateway reports success, 400 otherwise; either way the body carries the redirect hint.
pub async fn verify(State(s): State<AppState>, Owner(owner): Owner, ValidatedJson(r): ValidatedJson<VerifyRequest>) -> Result<(StatusCode, Json<VerifyView>), ApiError> {
    let outcome = s.payments.verify(owner, &r.payment_intent_id).await?;
    let status = if outcome.success { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    Ok((status, Json(VerifyView::from(outcome))))
}

pub async fn webhook(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<serde_json::Value>, ApiError> {
    let verifier = s.webhook.as_ref().ok_or_else(|| ApiError::BadRequest("webhooks are not configured".into()))?;
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing signature".into()))?;
    let event = verifier.verify(&body, signature, chrono::Utc::now().timestamp()).map_err(|e| {
        tracing::warn!(error = %e, "rejected webhook");
        ApiError::BadRequest(e.to_string())
    })?;
    match event.payment_intent_id() {
        Some(intent) => {
            let reconciled = s.payments.reconcile_intent(intent).await?;
            tracing::info!(kind = %event.kind, intent, reconciled = reconciled.is_some(), "webhook processed");
        }
        None => tracing::debug!(kind = %event.kind, "ignoring webhook event"),
    }
    Ok(Json(serde_json::json!({ "received": true })))
}
