//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::{Money, OrderId, OrderNumber, OwnerId, ProductRef, Quantity, VariantLabel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine { pub product: ProductRef, pub variant: VariantLabel, pub quantity: Quantity, pub unit_price_at_purchase: Money, pub line_total: Money }

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress { pub street: Option<String>, pub city: Option<String>, pub state: Option<String>, pub zip_code: Option<String>, pub country: Option<String> }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Processing, Completed, Failed, Refunded }

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str { match self { $(Self::$variant => $s),+ } }
        }
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
        }
        impl FromStr for $ty {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s { $($s => Ok(Self::$variant),)+ other => Err(format!("unknown {} `{other}`", stringify!($ty))) }
            }
        }
    };
}

status_strings!(OrderStatus { Pending => "pending", Processing => "processing", Shipped => "shipped", Delivered => "delivered", Cancelled => "cancelled" });
status_strings!(PaymentStatus { Pending => "pending", Processing => "processing", Completed => "completed", Failed => "failed", Refunded => "refunded" });

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) order_number: OrderNumber,
    pub(crate) owner: OwnerId,
    pub(crate) lines: Vec<OrderLine>,
    pub(crate) subtotal: Money,
    pub(crate) shipping_cost: Money,
    pub(crate) tax: Money,
    pub(crate) total_amount: Money,
    pub(crate) order_status: OrderStatus,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) payment_intent: Option<String>,
    pub(crate) shipping_address: Option<ShippingAddress>,
    pub(crate) version: i64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Order {
    /// Snapshots the cart at the unit prices stored on its lines. The catalog is not consulted.
    pub fn from_cart(cart: &Cart, shipping_cost: Money, tax_rate: Decimal, shipping_address: Option<ShippingAddress>) -> Result<Self, OrderError> {
        if cart.is_empty() { return Err(OrderError::NoItems); }
        if shipping_cost.is_negative() { return Err(OrderError::NegativeShipping); }
        let lines: Vec<OrderLine> = cart.lines().iter().map(|l| OrderLine {
            product: l.product, variant: l.variant.clone(), quantity: l.quantity,
            unit_price_at_purchase: l.unit_price, line_total: l.unit_price.multiply(l.quantity),
        }).collect();
        let subtotal: Money = lines.iter().map(|l| l.line_total).sum();
        let tax = subtotal.percentage(tax_rate);
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(), order_number: OrderNumber::generate(), owner: cart.owner(), lines,
            subtotal, shipping_cost, tax, total_amount: subtotal.add(shipping_cost).add(tax),
            order_status: OrderStatus::Pending, payment_status: PaymentStatus::Pending, payment_intent: None,
            shipping_address, version: 0, created_at: now, updated_at: now,
        })
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn order_number(&self) -> &OrderNumber { &self.order_number }
    pub fn owner(&self) -> OwnerId { self.owner }
    pub fn lines(&self) -> &[OrderLine] { &self.lines }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn shipping_cost(&self) -> Money { self.shipping_cost }
    pub fn tax(&self) -> Money { self.tax }
    pub fn total_amount(&self) -> Money { self.total_amount }
    pub fn order_status(&self) -> OrderStatus { self.order_status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_intent(&self) -> Option<&str> { self.payment_intent.as_deref() }
    pub fn shipping_address(&self) -> Option<&ShippingAddress> { self.shipping_address.as_ref() }
    pub fn version(&self) -> i64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn can_pay(&self) -> bool {
        self.order_status != OrderStatus::Cancelled
            && matches!(self.payment_status, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Money was taken for this order, whether or not it has since been refunded or cancelled.
    pub fn is_settled(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Completed | PaymentStatus::Refunded)
    }

    /// Re-applies shipping, tax and address before a (retried) payment. The line snapshot is untouched.
    pub fn refresh_charges(&mut self, shipping_cost: Option<Money>, tax_rate: Decimal, shipping_address: Option<ShippingAddress>) -> Result<(), OrderError> {
        if !self.can_pay() {
            return Err(OrderError::InvalidPaymentState { status: self.payment_status });
        }
        if let Some(shipping) = shipping_cost {
            if shipping.is_negative() { return Err(OrderError::NegativeShipping); }
            self.shipping_cost = shipping;
        }
        if shipping_address.is_some() { self.shipping_address = shipping_address; }
        self.tax = self.subtotal.percentage(tax_rate);
        self.total_amount = self.subtotal.add(self.shipping_cost).add(self.tax);
        self.touch();
        Ok(())
    }

    pub fn attach_payment_intent(&mut self, intent_ref: impl Into<String>) -> Result<(), OrderError> {
        if !self.can_pay() {
            return Err(OrderError::InvalidPaymentState { status: self.payment_status });
        }
        self.payment_intent = Some(intent_ref.into());
        self.payment_status = PaymentStatus::Processing;
        self.touch();
        Ok(())
    }

    /// A cancelled order stays cancelled; the payment is still recorded.
    pub fn mark_payment_completed(&mut self) {
        self.payment_status = PaymentStatus::Completed;
        if self.order_status == OrderStatus::Pending { self.order_status = OrderStatus::Processing; }
        self.touch();
    }

    /// Records a payment confirmed on `intent_ref`, which becomes the order's intent. Returns the
    /// intent it displaced when the customer paid one the order no longer pointed at.
    pub fn record_payment(&mut self, intent_ref: &str) -> Option<String> {
        let displaced = self.payment_intent.replace(intent_ref.to_string()).filter(|previous| previous != intent_ref);
        self.mark_payment_completed();
        displaced
    }

    pub fn mark_payment_failed(&mut self) {
        self.payment_status = PaymentStatus::Failed;
        self.order_status = OrderStatus::Cancelled;
        self.touch();
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.order_status {
            OrderStatus::Cancelled => Err(OrderError::AlreadyCancelled),
            OrderStatus::Shipped | OrderStatus::Delivered => Err(OrderError::InvalidTransition { status: self.order_status }),
            OrderStatus::Pending | OrderStatus::Processing => {
                self.order_status = OrderStatus::Cancelled;
                self.touch();
                Ok(())
            }
        }
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("cannot create an order without items")]
    NoItems,
    #[error("shipping cost cannot be negative")]
    NegativeShipping,
    #[error("order cannot be cancelled with status: {status}")]
    InvalidTransition { status: OrderStatus },
    #[error("order is already cancelled")]
    AlreadyCancelled,
    #[error("cannot take payment for order with payment status: {status}")]
    InvalidPaymentState { status: PaymentStatus },
}
