//! Payment Reconciliation
//!
//! Local order and cart state only ever follows the status the gateway reports for an intent.
//! Nothing a client asserts about a payment is taken at face value.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use crate::domain::aggregates::{Order, OrderError, OrderStatus, PaymentStatus};
use crate::domain::events::OrderEvent;
use crate::domain::value_objects::{OrderId, OwnerId};
use crate::error::{EcommerceError, Result};
use crate::ports::{CartStore, IntentRequest, IntentStatus, OrderStore, PaymentGateway, PaymentIntent, StoreError};
use crate::services::{complete_cart, Notifications, MAX_ATTEMPTS};

/// Intent metadata key naming the order an intent was opened for.
const ORDER_ID_METADATA: &str = "orderId";

pub const CONFIRMATION_REDIRECT: &str = "/order-confirmation";
pub const RETRY_REDIRECT: &str = "/payment/failed";
pub const ERROR_REDIRECT: &str = "/payment/error";

#[derive(Clone, Debug)]
pub struct IntentGrant {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub order: Order,
    /// True when an existing gateway intent was handed back.
    pub reused: bool,
}

#[derive(Clone, Debug)]
pub struct VerifyOutcome {
    pub success: bool,
    pub message: String,
    pub gateway_status: IntentStatus,
    pub order: Order,
    pub redirect: String,
}

#[derive(Clone)]
pub struct PaymentService {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Notifications,
    currency: String,
}

impl PaymentService {
    pub fn new(carts: Arc<dyn CartStore>, orders: Arc<dyn OrderStore>, gateway: Arc<dyn PaymentGateway>, notifications: Notifications, currency: impl Into<String>) -> Self {
        Self { carts, orders, gateway, notifications, currency: currency.into() }
    }

    /// Hands back the order's live intent when it is still usable, otherwise opens a new one.
    #[instrument(skip(self))]
    pub async fn create_or_retrieve_intent(&self, owner: OwnerId, order_id: OrderId) -> Result<IntentGrant> {
        let mut order = self.orders.find(order_id).await?.ok_or(EcommerceError::OrderNotFound)?;
        if order.owner() != owner { return Err(EcommerceError::Unauthorized); }

        let amount_minor = order.total_amount().to_minor_units()
            .ok_or_else(|| EcommerceError::Validation(format!("order total {} cannot be charged", order.total_amount())))?;

        if let (Some(existing), PaymentStatus::Processing) = (order.payment_intent(), order.payment_status()) {
            match self.gateway.retrieve_intent(existing).await {
                Ok(Some(intent)) if intent.status == IntentStatus::Succeeded => {
                    tracing::info!(intent = %intent.id, "existing intent already paid, reconciling instead of charging again");
                    let outcome = self.reconcile(order, &intent).await?;
                    return Err(OrderError::InvalidPaymentState { status: outcome.order.payment_status() }.into());
                }
                Ok(Some(intent)) if intent.status != IntentStatus::Canceled && intent.amount_minor == amount_minor => {
                    tracing::debug!(intent = %intent.id, "reusing live payment intent");
                    return Ok(IntentGrant { client_secret: intent.client_secret, payment_intent_id: intent.id, order, reused: true });
                }
                Ok(Some(intent)) if intent.status != IntentStatus::Canceled => {
                    tracing::info!(intent = %intent.id, amount_minor = intent.amount_minor, "order total changed, cancelling superseded intent");
                    // Rejected once paid; the next attempt reconciles it.
                    self.gateway.cancel_intent(&intent.id).await?;
                }
                Ok(Some(intent)) => tracing::info!(intent = %intent.id, "existing intent canceled, creating a new one"),
                Ok(None) => tracing::info!(intent = existing, "existing intent unknown to gateway, creating a new one"),
                Err(e) => tracing::warn!(intent = existing, error = %e, "could not retrieve existing intent, creating a new one"),
            }
        }

        if !order.can_pay() {
            return Err(OrderError::InvalidPaymentState { status: order.payment_status() }.into());
        }

        let request = IntentRequest {
            amount_minor,
            currency: self.currency.clone(),
            metadata: BTreeMap::from([
                (ORDER_ID_METADATA.to_string(), order.id().to_string()),
                ("orderNumber".to_string(), order.order_number().to_string()),
                ("userId".to_string(), owner.to_string()),
            ]),
            idempotency_key: format!("order-{}-v{}", order.id(), order.version()),
        };
        let intent = self.gateway.create_intent(&request).await.inspect_err(|e| {
            tracing::error!(order_id = %order.id(), error = %e, "payment intent creation failed");
        })?;
        order.attach_payment_intent(intent.id.clone())?;
        let order = self.orders.save(&order).await?;
        tracing::info!(order_id = %order.id(), intent = %intent.id, amount_minor, "payment intent created");
        Ok(IntentGrant { client_secret: intent.client_secret, payment_intent_id: intent.id, order, reused: false })
    }

    /// Client-initiated verification; the caller must own the order behind the intent.
    #[instrument(skip(self))]
    pub async fn verify(&self, owner: OwnerId, payment_intent_id: &str) -> Result<VerifyOutcome> {
        let intent = self.gateway.retrieve_intent(payment_intent_id).await?.ok_or(EcommerceError::PaymentIntentNotFound)?;
        let order = self.order_for(&intent).await?.ok_or(EcommerceError::OrderNotFound)?;
        if order.owner() != owner { return Err(EcommerceError::Unauthorized); }
        self.reconcile(order, &intent).await
    }

    /// Gateway-initiated reconciliation (webhooks). Unknown intents are ignored.
    #[instrument(skip(self))]
    pub async fn reconcile_intent(&self, payment_intent_id: &str) -> Result<Option<VerifyOutcome>> {
        let Some(intent) = self.gateway.retrieve_intent(payment_intent_id).await? else {
            tracing::warn!("webhook referenced an intent the gateway does not know");
            return Ok(None);
        };
        match self.order_for(&intent).await? {
            Some(order) => self.reconcile(order, &intent).await.map(Some),
            None => {
                tracing::debug!("no order for intent, ignoring");
                Ok(None)
            }
        }
    }

    /// The order currently pointing at the intent, or else the one named in its metadata. The
    /// latter covers intents superseded by a later checkout or left behind by a cancellation.
    async fn order_for(&self, intent: &PaymentIntent) -> Result<Option<Order>> {
        if let Some(order) = self.orders.find_by_payment_intent(&intent.id).await? { return Ok(Some(order)); }
        let Some(order_id) = intent.metadata.get(ORDER_ID_METADATA).and_then(|id| Uuid::parse_str(id).ok()) else {
            return Ok(None);
        };
        Ok(self.orders.find(OrderId::from(order_id)).await?)
    }

    async fn reconcile(&self, mut order: Order, intent: &PaymentIntent) -> Result<VerifyOutcome> {
        let status = intent.status.clone();
        let current = order.payment_intent() == Some(intent.id.as_str());
        let (success, message, redirect) = match &status {
            IntentStatus::Succeeded => {
                if order.payment_status() != PaymentStatus::Completed {
                    let displaced = order.record_payment(&intent.id);
                    order = self.orders.save(&order).await?;
                    if order.order_status() == OrderStatus::Cancelled {
                        tracing::warn!(order_id = %order.id(), intent = %intent.id, "payment captured for a cancelled order, refund required");
                    }
                    self.notifications.emit(order.owner(), OrderEvent::PaymentCompleted {
                        order_id: order.id(), order_number: order.order_number().clone(),
                    }).await;
                    if let Some(displaced) = displaced { self.release(&displaced).await; }
                } else if !current {
                    tracing::warn!(order_id = %order.id(), intent = %intent.id, "second payment captured for a paid order, refund required");
                }
                self.finish_cart(&order).await?;
                (true, "Payment verified and order completed".to_string(), format!("{CONFIRMATION_REDIRECT}?orderId={}", order.order_number()))
            }
            IntentStatus::RequiresPaymentMethod => (false, "Payment failed - requires new payment method".to_string(), RETRY_REDIRECT.to_string()),
            IntentStatus::Canceled => {
                // Cancelling a superseded intent says nothing about the order's payment.
                if current && order.payment_status() != PaymentStatus::Failed {
                    order.mark_payment_failed();
                    order = self.orders.save(&order).await?;
                    self.notifications.emit(order.owner(), OrderEvent::PaymentFailed {
                        order_id: order.id(), order_number: order.order_number().clone(),
                    }).await;
                }
                (false, "Payment was canceled".to_string(), ERROR_REDIRECT.to_string())
            }
            IntentStatus::RequiresAction => (false, "Payment requires additional action".to_string(), RETRY_REDIRECT.to_string()),
            other => (false, format!("Payment is in {other} status"), ERROR_REDIRECT.to_string()),
        };
        tracing::info!(order_id = %order.id(), gateway_status = %status, current, success, "payment reconciled");
        Ok(VerifyOutcome { success, message, gateway_status: status, order, redirect })
    }

    /// Best effort: the intent a payment displaced must not take a second charge.
    async fn release(&self, intent_id: &str) {
        match self.gateway.cancel_intent(intent_id).await {
            Ok(_) => tracing::info!(intent = intent_id, "cancelled intent displaced by a payment"),
            Err(e) => tracing::warn!(intent = intent_id, error = %e, "could not cancel displaced intent"),
        }
    }

    async fn finish_cart(&self, order: &Order) -> Result<()> {
        for attempt in 1..=MAX_ATTEMPTS {
            let Some(cart) = self.carts.find_by_order(order.id()).await? else {
                tracing::debug!(order_id = %order.id(), "no cart linked to paid order");
                return Ok(());
            };
            if complete_cart(self.carts.as_ref(), &self.notifications, cart, order.id()).await? { return Ok(()); }
            tracing::debug!(attempt, "retrying cart completion");
        }
        Err(StoreError::Conflict(format!("cart completion abandoned after {MAX_ATTEMPTS} attempts")).into())
    }
}
