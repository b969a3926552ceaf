//! Everything the cart and checkout services need from the outside world.
//!
//! Adapters live in [`crate::infrastructure`]: PostgreSQL and in-memory stores, a
//! Stripe-compatible HTTP gateway, a NATS notifier, and rate limiters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use crate::domain::aggregates::{Cart, Order};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Money, OrderId, OrderNumber, OwnerId, ProductRef, VariantLabel};

// =============================================================================
// Catalog Lookup
// =============================================================================

/// Outcome of resolving a product reference at the moment of the call.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    NotFound,
    Inactive,
    VariantNotFound,
    /// `stock` is `None` when the catalog does not track stock for the item.
    Available { unit_price: Money, stock: Option<u32> },
}

#[derive(Debug, Error)]
#[error("catalog lookup failed: {0}")]
pub struct CatalogError(pub String);

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn resolve(&self, product: ProductRef, variant: &VariantLabel) -> Result<Resolution, CatalogError>;
}

// =============================================================================
// Persistence
// =============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    /// Stale version or a uniqueness constraint; re-read and retry.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page { pub page: u32, pub per_page: u32 }

impl Page {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: per_page.unwrap_or(10).clamp(1, Self::MAX_PER_PAGE) }
    }

    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// The owner's active cart, or failing that the most recently touched processing cart.
    async fn find_open(&self, owner: OwnerId) -> Result<Option<Cart>, StoreError>;
    async fn find_by_order(&self, order: OrderId) -> Result<Option<Cart>, StoreError>;
    /// Processing and completed carts, newest first.
    async fn history(&self, owner: OwnerId) -> Result<Vec<Cart>, StoreError>;
    /// Fails with `Conflict` when the owner already has an active cart.
    async fn insert(&self, cart: &Cart) -> Result<Cart, StoreError>;
    /// Compare-and-swap on `version`; returns the stored cart with its new version.
    async fn save(&self, cart: &Cart) -> Result<Cart, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<Order, StoreError>;
    async fn save(&self, order: &Order) -> Result<Order, StoreError>;
    async fn find(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;
    async fn find_by_payment_intent(&self, intent: &str) -> Result<Option<Order>, StoreError>;
    /// Newest first, with the owner's total order count.
    async fn list_for_owner(&self, owner: OwnerId, page: Page) -> Result<(Vec<Order>, u64), StoreError>;
}

// =============================================================================
// Payment Gateway
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    Other(String),
}

impl IntentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for IntentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_confirmation" => Self::RequiresConfirmation,
            "requires_action" => Self::RequiresAction,
            "processing" => Self::Processing,
            "requires_capture" => Self::RequiresCapture,
            "canceled" => Self::Canceled,
            "succeeded" => Self::Succeeded,
            _ => Self::Other(s),
        }
    }
}

impl From<IntentStatus> for String {
    fn from(s: IntentStatus) -> Self { s.as_str().to_string() }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
    /// Same key, same intent: retries of one attempt never create a second charge.
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub status: IntentStatus,
    #[serde(rename = "amount")]
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Unavailable(String),
    #[error("payment gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed payment gateway response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError>;
    /// `Ok(None)` when the gateway does not know the intent.
    async fn retrieve_intent(&self, id: &str) -> Result<Option<PaymentIntent>, GatewayError>;
    /// Stops an intent from being paid. Succeeded intents are rejected; `Ok(None)` when unknown.
    async fn cancel_intent(&self, id: &str) -> Result<Option<PaymentIntent>, GatewayError>;
}

// =============================================================================
// Notifications & rate limiting
// =============================================================================

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, owner: OwnerId, event: &DomainEvent) -> Result<(), NotifyError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

/// Fixed-window counter keyed by owner. Implementations may share state across instances.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn hit(&self, key: &str) -> Result<RateDecision, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(Page::new(None, None), Page { page: 1, per_page: 10 });
        assert_eq!(Page::new(Some(0), Some(500)), Page { page: 1, per_page: 100 });
        assert_eq!(Page::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn test_intent_status_parsing() {
        let parsed: IntentStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(parsed, IntentStatus::Succeeded);
        assert_eq!(IntentStatus::from("requires_action".to_string()), IntentStatus::RequiresAction);
        assert_eq!(IntentStatus::from("weird".to_string()), IntentStatus::Other("weird".into()));
    }
}
