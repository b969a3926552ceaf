//! Checkout Orchestrator
//!
//! Turns the owner's active cart into an order and links the two. Re-running checkout while
//! the cart is processing returns the same order, so a client coming back from the payment
//! provider can safely re-open checkout.

use std::sync::Arc;
use tracing::instrument;
use crate::config::CheckoutConfig;
use crate::domain::aggregates::{Cart, CartStatus, Order, PaymentStatus, ShippingAddress};
use crate::domain::events::{CartEvent, OrderEvent};
use crate::domain::value_objects::{Money, OrderId, OrderNumber, OwnerId};
use crate::error::{EcommerceError, Result};
use crate::ports::{CartStore, OrderStore, Page, PaymentGateway, StoreError};
use crate::services::{complete_cart, linked_order, LinkedOrder, Notifications, MAX_ATTEMPTS};

#[derive(Clone, Debug, Default)]
pub struct CheckoutRequest {
    pub shipping_cost: Option<Money>,
    pub shipping_address: Option<ShippingAddress>,
    /// Order the client believes it is resuming; informational only.
    pub order_hint: Option<OrderId>,
}

#[derive(Clone, Debug)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub cart: Cart,
    /// True when an existing order was returned instead of creating one.
    pub resumed: bool,
}

#[derive(Clone)]
pub struct CheckoutService {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Notifications,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(carts: Arc<dyn CartStore>, orders: Arc<dyn OrderStore>, gateway: Arc<dyn PaymentGateway>, notifications: Notifications, config: CheckoutConfig) -> Self {
        Self { carts, orders, gateway, notifications, config }
    }

    #[instrument(skip(self, request), fields(order_hint = ?request.order_hint))]
    pub async fn checkout(&self, owner: OwnerId, request: CheckoutRequest) -> Result<CheckoutOutcome> {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut cart = self.carts.find_open(owner).await?.ok_or(EcommerceError::NoCart)?;

            if cart.status() == CartStatus::Processing {
                match linked_order(self.orders.as_ref(), &cart).await? {
                    LinkedOrder::Payable(order) => {
                        if request.order_hint.is_some_and(|hint| hint != order.id()) {
                            tracing::debug!(linked = %order.id(), "checkout hint differs from linked order, using linked order");
                        }
                        let order = self.refresh(order, &request).await?;
                        return Ok(CheckoutOutcome { order, cart, resumed: true });
                    }
                    LinkedOrder::Settled(order_id) => {
                        tracing::info!(cart_id = %cart.id(), %order_id, "linked order already paid, completing cart");
                        complete_cart(self.carts.as_ref(), &self.notifications, cart, order_id).await?;
                        continue;
                    }
                    LinkedOrder::Abandoned => {}
                }
                tracing::info!(cart_id = %cart.id(), "linked order missing or closed, reverting cart to active");
                cart.revert_to_active();
                cart = match self.carts.save(&cart).await {
                    Ok(saved) => saved,
                    Err(StoreError::Conflict(reason)) => {
                        tracing::debug!(attempt, %reason, "cart changed during checkout, retrying");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                self.notifications.emit(owner, CartEvent::Reverted { cart_id: cart.id() }).await;
            }

            if !cart.can_checkout() { return Err(EcommerceError::NoCart); }

            match self.place_order(cart, &request).await? {
                Some(outcome) => return Ok(outcome),
                None => tracing::debug!(attempt, "cart changed while placing order, retrying"),
            }
        }
        Err(StoreError::Conflict(format!("checkout abandoned after {MAX_ATTEMPTS} attempts")).into())
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, owner: OwnerId, order_id: OrderId) -> Result<Order> {
        let mut order = self.owned_order(owner, order_id).await?;
        let awaiting_payment = order.payment_status() == PaymentStatus::Processing;
        order.cancel()?;
        let order = self.orders.save(&order).await?;
        if let Some(intent) = order.payment_intent().filter(|_| awaiting_payment) {
            // A payment that still lands is recorded by reconciliation.
            if let Err(e) = self.gateway.cancel_intent(intent).await {
                tracing::warn!(%order_id, intent, error = %e, "could not cancel payment intent of cancelled order");
            }
        }
        self.notifications.emit(owner, OrderEvent::Cancelled { order_id }).await;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, owner: OwnerId, page: Page) -> Result<(Vec<Order>, u64)> {
        Ok(self.orders.list_for_owner(owner, page).await?)
    }

    /// Orders belonging to someone else are reported as missing.
    #[instrument(skip(self))]
    pub async fn owned_order(&self, owner: OwnerId, order_id: OrderId) -> Result<Order> {
        self.orders.find(order_id).await?
            .filter(|o| o.owner() == owner)
            .ok_or(EcommerceError::OrderNotFound)
    }

    #[instrument(skip(self))]
    pub async fn order_by_number(&self, owner: OwnerId, number: &OrderNumber) -> Result<Order> {
        self.orders.find_by_number(number).await?
            .filter(|o| o.owner() == owner)
            .ok_or(EcommerceError::OrderNotFound)
    }

    async fn refresh(&self, mut order: Order, request: &CheckoutRequest) -> Result<Order> {
        order.refresh_charges(request.shipping_cost, self.config.tax_rate, request.shipping_address.clone())?;
        Ok(self.orders.save(&order).await?)
    }

    /// `Ok(None)` when the cart moved underneath us; the orphaned order is cancelled.
    async fn place_order(&self, mut cart: Cart, request: &CheckoutRequest) -> Result<Option<CheckoutOutcome>> {
        let order = Order::from_cart(&cart, request.shipping_cost.unwrap_or(Money::ZERO), self.config.tax_rate, request.shipping_address.clone())?;
        let order = self.orders.insert(&order).await?;
        cart.mark_processing(order.id())?;
        let cart = match self.carts.save(&cart).await {
            Ok(saved) => saved,
            Err(StoreError::Conflict(_)) => {
                self.discard(order).await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(order_id = %order.id(), order_number = %order.order_number(), total = %order.total_amount(), "order created");
        self.notifications.emit(cart.owner(), OrderEvent::Created {
            order_id: order.id(), order_number: order.order_number().clone(), total_amount: order.total_amount(),
        }).await;
        Ok(Some(CheckoutOutcome { order, cart, resumed: false }))
    }

    async fn discard(&self, mut order: Order) {
        if order.cancel().is_ok() {
            if let Err(e) = self.orders.save(&order).await {
                tracing::warn!(order_id = %order.id(), error = %e, "could not cancel orphaned order");
            }
        }
    }
}
