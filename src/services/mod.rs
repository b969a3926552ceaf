//! Application services: the cart aggregate operations, the checkout orchestrator and
//! payment reconciliation. They are written against [`crate::ports`] only.

pub mod cart;
pub mod checkout;
pub mod payment;

pub use cart::CartService;
pub use checkout::{CheckoutOutcome, CheckoutRequest, CheckoutService};
pub use payment::{IntentGrant, PaymentService, VerifyOutcome};

use std::sync::Arc;
use std::time::Duration;
use crate::domain::aggregates::{Cart, CartStatus, Order};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::{OrderId, OwnerId};
use crate::error::Result;
use crate::ports::{CartStore, Notifier, OrderStore, StoreError};

/// Optimistic-concurrency attempts before a command gives up with a conflict.
pub const MAX_ATTEMPTS: u32 = 3;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Fire-and-forget fan-out. A slow or failing notifier never fails the caller's write.
#[derive(Clone)]
pub struct Notifications {
    notifier: Arc<dyn Notifier>,
}

impl Notifications {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self { Self { notifier } }

    pub async fn emit(&self, owner: OwnerId, event: impl Into<DomainEvent>) {
        let event = event.into();
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.notifier.publish(owner, &event)).await {
            Ok(Ok(())) => tracing::trace!(%owner, stream = event.stream(), "notification sent"),
            Ok(Err(e)) => tracing::warn!(%owner, error = %e, "notification failed, continuing"),
            Err(_) => tracing::warn!(%owner, "notification timed out, continuing"),
        }
    }
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("Notifications") }
}

/// Where a processing cart's checkout stands, judged from its linked order.
pub(crate) enum LinkedOrder {
    Payable(Order),
    /// Paid at some point; the cart is finished and must never reopen.
    Settled(OrderId),
    /// Missing, someone else's, cancelled before payment, or payment failed.
    Abandoned,
}

pub(crate) async fn linked_order(orders: &dyn OrderStore, cart: &Cart) -> Result<LinkedOrder> {
    let Some(order_id) = cart.linked_order() else { return Ok(LinkedOrder::Abandoned) };
    let order = orders.find(order_id).await?.filter(|o| o.owner() == cart.owner());
    Ok(match order {
        Some(order) if order.is_settled() => LinkedOrder::Settled(order.id()),
        Some(order) if order.can_pay() => LinkedOrder::Payable(order),
        _ => LinkedOrder::Abandoned,
    })
}

/// Moves a processing cart to completed. `Ok(false)` when the cart changed underneath and must be re-read.
pub(crate) async fn complete_cart(carts: &dyn CartStore, notifications: &Notifications, mut cart: Cart, order_id: OrderId) -> Result<bool> {
    if cart.status() == CartStatus::Completed { return Ok(true); }
    cart.mark_completed()?;
    match carts.save(&cart).await {
        Ok(saved) => {
            notifications.emit(saved.owner(), CartEvent::Completed { cart_id: saved.id(), order_id }).await;
            Ok(true)
        }
        Err(StoreError::Conflict(reason)) => {
            tracing::debug!(cart_id = %cart.id(), %reason, "cart changed while completing");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
