//! Domain events, pushed to the owner's live connections after a successful write

use serde::Serialize;
use crate::domain::value_objects::{CartId, Money, OrderId, OrderNumber, ProductRef, Quantity, VariantLabel};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "stream", content = "event", rename_all = "lowercase")]
pub enum DomainEvent {
    Cart(CartEvent),
    Order(OrderEvent),
}

impl DomainEvent {
    /// Subject suffix the event is published under.
    pub fn stream(&self) -> &'static str {
        match self { Self::Cart(_) => "cart", Self::Order(_) => "order" }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartEvent {
    ItemAdded { cart_id: CartId, product: ProductRef, variant: VariantLabel, quantity: Quantity, unit_price: Money },
    ItemUpdated { cart_id: CartId, product: ProductRef, variant: VariantLabel, quantity: Quantity },
    ItemRemoved { cart_id: CartId, product: ProductRef, variant: VariantLabel },
    Cleared { cart_id: CartId },
    Reverted { cart_id: CartId },
    Completed { cart_id: CartId, order_id: OrderId },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
    Created { order_id: OrderId, order_number: OrderNumber, total_amount: Money },
    PaymentCompleted { order_id: OrderId, order_number: OrderNumber },
    PaymentFailed { order_id: OrderId, order_number: OrderNumber },
    Cancelled { order_id: OrderId },
}

impl From<CartEvent> for DomainEvent { fn from(e: CartEvent) -> Self { Self::Cart(e) } }
impl From<OrderEvent> for DomainEvent { fn from(e: OrderEvent) -> Self { Self::Order(e) } }
