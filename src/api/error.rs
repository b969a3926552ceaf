//! Error → HTTP response mapping

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use validator::ValidationErrors;
use crate::domain::aggregates::CartStatus;
use crate::error::{EcommerceError, ErrorKind};

#[derive(Debug)]
pub enum ApiError {
    Service(EcommerceError),
    /// No usable identity on the request.
    Unauthenticated,
    BadRequest(String),
    Invalid(ValidationErrors),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_status: Option<CartStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
}

impl ErrorBody {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self { success: false, code, message: message.into(), suggestion: None, cart_status: None, errors: None }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::DomainState => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<EcommerceError> for ApiError {
    fn from(e: EcommerceError) -> Self { Self::Service(e) }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self { Self::Invalid(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, retry_after) = match self {
            Self::Service(e) => {
                let kind = e.kind();
                let status = status_for(kind);
                let message = if kind == ErrorKind::Fatal {
                    tracing::error!(error = %e, "request failed");
                    "Server error".to_string()
                } else {
                    e.to_string()
                };
                let retry_after = match &e { EcommerceError::RateLimited { retry_after_secs } => Some(*retry_after_secs), _ => None };
                let body = ErrorBody { suggestion: e.suggestion(), cart_status: e.cart_status(), ..ErrorBody::new(e.code(), message) };
                (status, body, retry_after)
            }
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, ErrorBody::new("UNAUTHENTICATED", "Missing or invalid user identity"), None),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, ErrorBody::new("VALIDATION_FAILED", message), None),
            Self::Invalid(errors) => {
                let details = serde_json::to_value(errors.field_errors()).ok();
                (StatusCode::BAD_REQUEST, ErrorBody { errors: details, ..ErrorBody::new("VALIDATION_FAILED", "Request validation failed") }, None)
            }
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::CartError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(EcommerceError::OrderNotFound).into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(EcommerceError::Unauthorized).into_response().status(), StatusCode::FORBIDDEN);
        let not_modifiable = EcommerceError::Cart(CartError::NotModifiable { status: CartStatus::Processing });
        assert_eq!(ApiError::from(not_modifiable).into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthenticated.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::from(EcommerceError::RateLimited { retry_after_secs: 12 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }
}
