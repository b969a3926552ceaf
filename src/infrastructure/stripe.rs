//! Stripe-compatible payment gateway over HTTP, plus webhook signature verification.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use crate::ports::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};

type HmacSha256 = Hmac<Sha256>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope { error: ErrorBody }

#[derive(Deserialize)]
struct ErrorBody { message: Option<String> }

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self { client, api_base: api_base.into().trim_end_matches('/').to_string(), secret_key: secret_key.into() })
    }

    async fn parse(response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<PaymentIntent>().await.map_err(|e| GatewayError::Malformed(e.to_string()));
        }
        let message = match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => envelope.error.message.unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };
        Err(GatewayError::Rejected { status: status.as_u16(), message })
    }
}

fn valid_intent_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 255 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        form.extend(request.metadata.iter().map(|(k, v)| (format!("metadata[{k}]"), v.clone())));

        let response = self.client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Self::parse(response).await
    }

    async fn retrieve_intent(&self, id: &str) -> Result<Option<PaymentIntent>, GatewayError> {
        if !valid_intent_id(id) { return Ok(None); }
        let response = self.client
            .get(format!("{}/v1/payment_intents/{id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND { return Ok(None); }
        Self::parse(response).await.map(Some)
    }

    async fn cancel_intent(&self, id: &str) -> Result<Option<PaymentIntent>, GatewayError> {
        if !valid_intent_id(id) { return Ok(None); }
        let response = self.client
            .post(format!("{}/v1/payment_intents/{id}/cancel", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND { return Ok(None); }
        Self::parse(response).await.map(Some)
    }
}

// =============================================================================
// Webhooks
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing or malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
    #[error("unparseable webhook payload: {0}")]
    Payload(String),
}

/// The part of a gateway event reconciliation needs.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebhookData { pub object: WebhookObject }

#[derive(Clone, Debug, Deserialize)]
pub struct WebhookObject { pub id: String }

impl WebhookEvent {
    /// Intent id for `payment_intent.*` events.
    pub fn payment_intent_id(&self) -> Option<&str> {
        self.kind.starts_with("payment_intent.").then_some(self.data.object.id.as_str())
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").field("tolerance_secs", &self.tolerance_secs).finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into(), tolerance_secs: Self::DEFAULT_TOLERANCE_SECS }
    }

    /// Checks a `t=<unix>,v1=<hex>` header against the raw body, then parses the event.
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<WebhookEvent, WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
                Some(("v1", sig)) => signatures.push(sig),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() { return Err(WebhookError::MalformedHeader); }
        if (now - timestamp).abs() > self.tolerance_secs { return Err(WebhookError::Expired); }

        let matched = signatures.iter().filter_map(|sig| hex::decode(sig).ok()).any(|expected| {
            let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else { return false };
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(&expected).is_ok()
        });
        if !matched { return Err(WebhookError::Mismatch); }

        serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#;

    fn sign(payload: &[u8], secret: &str, t: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{t}.").as_bytes());
        mac.update(payload);
        format!("t={t},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature() {
        let event = WebhookVerifier::new(SECRET).verify(BODY, &sign(BODY, SECRET, 1_000), 1_010).unwrap();
        assert_eq!(event.payment_intent_id(), Some("pi_123"));
    }

    #[test]
    fn test_rejects_wrong_secret_and_tampering() {
        let verifier = WebhookVerifier::new(SECRET);
        assert_eq!(verifier.verify(BODY, &sign(BODY, "other", 1_000), 1_000).unwrap_err(), WebhookError::Mismatch);
        let header = sign(BODY, SECRET, 1_000);
        assert_eq!(verifier.verify(b"{}", &header, 1_000).unwrap_err(), WebhookError::Mismatch);
    }

    #[test]
    fn test_rejects_stale_and_malformed() {
        let verifier = WebhookVerifier::new(SECRET);
        assert_eq!(verifier.verify(BODY, &sign(BODY, SECRET, 1_000), 1_301).unwrap_err(), WebhookError::Expired);
        assert_eq!(verifier.verify(BODY, "v1=abcd", 1_000).unwrap_err(), WebhookError::MalformedHeader);
        assert_eq!(verifier.verify(BODY, "t=1000", 1_000).unwrap_err(), WebhookError::MalformedHeader);
    }

    #[test]
    fn test_non_intent_events_carry_no_intent() {
        let body = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        let event = WebhookVerifier::new(SECRET).verify(body, &sign(body, SECRET, 5), 5).unwrap();
        assert_eq!(event.payment_intent_id(), None);
    }

    #[test]
    fn test_intent_id_validation() {
        assert!(valid_intent_id("pi_3Mtw"));
        assert!(!valid_intent_id("pi/../x"));
        assert!(!valid_intent_id(""));
    }
}
