//! Request schemas and response views

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{Cart, CartLine, CartStatus, Order, OrderLine, OrderStatus, PaymentStatus, ShippingAddress};
use crate::domain::value_objects::{Money, VariantLabel};
use crate::ports::IntentStatus;
use crate::services::{IntentGrant, VerifyOutcome};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: Option<u32>,
    #[validate(length(max = 50))]
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    pub product_id: Uuid,
    #[validate(range(max = 100))]
    pub quantity: u32,
    #[validate(length(max = 50))]
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RemoveItemRequest {
    pub product_id: Uuid,
    #[validate(length(max = 50))]
    pub variant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub shipping_cost: Option<Decimal>,
    pub shipping_address: Option<ShippingAddress>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest { pub order_id: Uuid }

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams { pub page: Option<u32>, pub limit: Option<u32> }

pub fn variant(label: Option<String>) -> VariantLabel { VariantLabel::from(label) }

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self { Self { success: true, message: None, data } }
    pub fn with_message(message: impl Into<String>, data: T) -> Self { Self { success: true, message: Some(message.into()), data } }
}

fn money(m: Money) -> String { m.to_string() }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView { pub product_id: Uuid, pub variant: Option<String>, pub quantity: u32, pub unit_price: String, pub line_total: String }

impl From<&CartLine> for CartItemView {
    fn from(l: &CartLine) -> Self {
        Self {
            product_id: l.product.as_uuid(), variant: l.variant.as_deref().map(str::to_string),
            quantity: l.quantity.value(), unit_price: money(l.unit_price), line_total: money(l.line_total),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Uuid,
    pub status: CartStatus,
    pub items: Vec<CartItemView>,
    pub total_items: u32,
    pub total_amount: String,
    pub can_modify: bool,
    pub is_processing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_order: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Cart> for CartView {
    fn from(c: &Cart) -> Self {
        Self {
            id: c.id().as_uuid(), status: c.status(), items: c.lines().iter().map(CartItemView::from).collect(),
            total_items: c.total_items().value(), total_amount: money(c.total_amount()),
            can_modify: c.can_modify(), is_processing: c.is_processing(),
            linked_order: c.linked_order().map(|o| o.as_uuid()), updated_at: c.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView { pub product_id: Uuid, pub variant: Option<String>, pub quantity: u32, pub unit_price: String, pub line_total: String }

impl From<&OrderLine> for OrderItemView {
    fn from(l: &OrderLine) -> Self {
        Self {
            product_id: l.product.as_uuid(), variant: l.variant.as_deref().map(str::to_string),
            quantity: l.quantity.value(), unit_price: money(l.unit_price_at_purchase), line_total: money(l.line_total),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItemView>,
    pub subtotal: String,
    pub shipping_cost: String,
    pub tax: String,
    pub total_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(o: &Order) -> Self {
        Self {
            id: o.id().as_uuid(), order_number: o.order_number().to_string(),
            order_status: o.order_status(), payment_status: o.payment_status(),
            items: o.lines().iter().map(OrderItemView::from).collect(),
            subtotal: money(o.subtotal()), shipping_cost: money(o.shipping_cost()), tax: money(o.tax()),
            total_amount: money(o.total_amount()), shipping_address: o.shipping_address().cloned(),
            payment_intent_id: o.payment_intent().map(str::to_string),
            created_at: o.created_at(), updated_at: o.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView { pub order: OrderView, pub cart: CartView, pub resumed: bool }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub order_id: Uuid,
    pub order_number: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: String,
    pub payment_intent_id: Option<String>,
    pub can_pay: bool,
}

impl From<&Order> for PaymentView {
    fn from(o: &Order) -> Self {
        Self {
            order_id: o.id().as_uuid(), order_number: o.order_number().to_string(),
            order_status: o.order_status(), payment_status: o.payment_status(),
            total_amount: money(o.total_amount()), payment_intent_id: o.payment_intent().map(str::to_string),
            can_pay: o.can_pay(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown { pub subtotal: String, pub shipping: String, pub tax: String, pub total: String }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentView {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: String,
    pub currency: String,
    pub breakdown: Breakdown,
    pub reused: bool,
}

impl IntentView {
    pub fn new(grant: IntentGrant, currency: &str) -> Self {
        let o = &grant.order;
        Self {
            order_id: o.id().as_uuid(), order_number: o.order_number().to_string(), amount: money(o.total_amount()),
            currency: currency.to_string(),
            breakdown: Breakdown { subtotal: money(o.subtotal()), shipping: money(o.shipping_cost()), tax: money(o.tax()), total: money(o.total_amount()) },
            reused: grant.reused, client_secret: grant.client_secret, payment_intent_id: grant.payment_intent_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary { pub id: Uuid, pub order_number: String, pub order_status: OrderStatus, pub payment_status: PaymentStatus, pub total_amount: String }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyView {
    pub success: bool,
    pub message: String,
    pub payment_status: IntentStatus,
    pub order: OrderSummary,
    pub redirect_url: String,
}

impl From<VerifyOutcome> for VerifyView {
    fn from(v: VerifyOutcome) -> Self {
        let o = &v.order;
        let order = OrderSummary {
            id: o.id().as_uuid(), order_number: o.order_number().to_string(),
            order_status: o.order_status(), payment_status: o.payment_status(), total_amount: money(o.total_amount()),
        };
        Self { success: v.success, message: v.message, payment_status: v.gateway_status, order, redirect_url: v.redirect }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination { pub page: u32, pub limit: u32, pub total: u64, pub pages: u64 }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderList { pub success: bool, pub data: Vec<OrderView>, pub pagination: Pagination }
