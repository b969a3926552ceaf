//! Cart Aggregate
//!
//! One cart per checkout attempt. At most one cart per owner is `active`; carts that went
//! through checkout are kept as `processing` or `completed` purchase history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use crate::domain::events::CartEvent;
use crate::domain::value_objects::{CartId, Money, OrderId, OwnerId, ProductRef, Quantity, VariantLabel};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus { #[default] Active, Processing, Completed }

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "active", Self::Processing => "processing", Self::Completed => "completed" }
    }
}

impl fmt::Display for CartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for CartStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown cart status `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: ProductRef,
    pub variant: VariantLabel,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub line_total: Money,
}

impl CartLine {
    pub fn new(product: ProductRef, variant: VariantLabel, quantity: Quantity, unit_price: Money) -> Self {
        Self { product, variant, quantity, unit_price, line_total: unit_price.multiply(quantity) }
    }

    /// Same logical item: same product and same variant (absent variants are equal).
    pub fn matches(&self, product: ProductRef, variant: &VariantLabel) -> bool {
        self.product == product && &self.variant == variant
    }
}

/// A mutation requested against the owner's cart.
#[derive(Clone, Debug, PartialEq)]
pub enum CartCommand {
    /// `unit_price` is the freshly resolved catalog price; `available_stock` caps the merged quantity.
    AddItem { product: ProductRef, variant: VariantLabel, quantity: Quantity, unit_price: Money, available_stock: Option<u32> },
    /// Zero removes the line.
    UpdateQuantity { product: ProductRef, variant: VariantLabel, quantity: Quantity },
    RemoveItem { product: ProductRef, variant: VariantLabel },
    Clear,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    pub(crate) id: CartId,
    pub(crate) owner: OwnerId,
    pub(crate) lines: Vec<CartLine>,
    pub(crate) status: CartStatus,
    pub(crate) linked_order: Option<OrderId>,
    pub(crate) total_items: Quantity,
    pub(crate) total_amount: Money,
    pub(crate) version: i64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn open(owner: OwnerId) -> Self {
        let now = Utc::now();
        Self {
            id: CartId::new(), owner, lines: vec![], status: CartStatus::Active, linked_order: None,
            total_items: Quantity::default(), total_amount: Money::ZERO, version: 0,
            created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> CartId { self.id }
    pub fn owner(&self) -> OwnerId { self.owner }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn status(&self) -> CartStatus { self.status }
    pub fn linked_order(&self) -> Option<OrderId> { self.linked_order }
    pub fn total_items(&self) -> Quantity { self.total_items }
    pub fn total_amount(&self) -> Money { self.total_amount }
    pub fn version(&self) -> i64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn can_modify(&self) -> bool { self.status == CartStatus::Active }
    pub fn is_processing(&self) -> bool { self.status == CartStatus::Processing }
    pub fn can_checkout(&self) -> bool { self.can_modify() && !self.is_empty() }

    pub fn find_line(&self, product: ProductRef, variant: &VariantLabel) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.matches(product, variant))
    }

    pub fn apply(&mut self, command: CartCommand) -> Result<CartEvent, CartError> {
        if self.status != CartStatus::Active {
            return Err(CartError::NotModifiable { status: self.status });
        }
        let event = match command {
            CartCommand::AddItem { product, variant, quantity, unit_price, available_stock } => {
                if quantity.is_zero() { return Err(CartError::InvalidQuantity); }
                let merged = self.find_line(product, &variant).map_or(quantity, |l| l.quantity.add(quantity));
                if let Some(available) = available_stock {
                    if merged.value() > available {
                        return Err(CartError::InsufficientStock { requested: merged.value(), available });
                    }
                }
                match self.lines.iter_mut().find(|l| l.matches(product, &variant)) {
                    Some(line) => {
                        line.quantity = merged;
                        line.unit_price = unit_price;
                        line.line_total = unit_price.multiply(merged);
                    }
                    None => self.lines.push(CartLine::new(product, variant.clone(), quantity, unit_price)),
                }
                CartEvent::ItemAdded { cart_id: self.id, product, variant, quantity, unit_price }
            }
            CartCommand::UpdateQuantity { product, variant, quantity } => {
                let idx = self.position(product, &variant)?;
                if quantity.is_zero() {
                    self.lines.remove(idx);
                } else if let Some(line) = self.lines.get_mut(idx) {
                    line.quantity = quantity;
                    line.line_total = line.unit_price.multiply(quantity);
                }
                CartEvent::ItemUpdated { cart_id: self.id, product, variant, quantity }
            }
            CartCommand::RemoveItem { product, variant } => {
                let idx = self.position(product, &variant)?;
                self.lines.remove(idx);
                CartEvent::ItemRemoved { cart_id: self.id, product, variant }
            }
            CartCommand::Clear => {
                if self.lines.is_empty() { return Err(CartError::EmptyCart); }
                self.lines.clear();
                CartEvent::Cleared { cart_id: self.id }
            }
        };
        self.recalculate();
        Ok(event)
    }

    pub fn mark_processing(&mut self, order: OrderId) -> Result<(), CartError> {
        if !self.can_checkout() {
            return Err(CartError::InvalidTransition { from: self.status, to: CartStatus::Processing });
        }
        self.status = CartStatus::Processing;
        self.linked_order = Some(order);
        self.touch();
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), CartError> {
        match self.status {
            CartStatus::Processing => { self.status = CartStatus::Completed; self.touch(); Ok(()) }
            CartStatus::Completed => Ok(()),
            CartStatus::Active => Err(CartError::InvalidTransition { from: self.status, to: CartStatus::Completed }),
        }
    }

    /// Processing carts whose checkout was abandoned become mutable again. Returns whether it reverted.
    pub fn revert_to_active(&mut self) -> bool {
        if self.status != CartStatus::Processing { return false; }
        self.status = CartStatus::Active;
        self.linked_order = None;
        self.touch();
        true
    }

    fn position(&self, product: ProductRef, variant: &VariantLabel) -> Result<usize, CartError> {
        self.lines.iter().position(|l| l.matches(product, variant))
            .ok_or_else(|| CartError::ItemNotFound { product, variant: variant.clone() })
    }

    fn recalculate(&mut self) {
        self.total_items = self.lines.iter().map(|l| l.quantity).sum();
        self.total_amount = self.lines.iter().map(|l| l.line_total).sum();
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CartError {
    #[error("cannot modify cart with status: {status}")]
    NotModifiable { status: CartStatus },
    #[error("item not found in cart (product {product}, variant {variant})")]
    ItemNotFound { product: ProductRef, variant: VariantLabel },
    #[error("cart is already empty")]
    EmptyCart,
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
    #[error("cart cannot move from {from} to {to}")]
    InvalidTransition { from: CartStatus, to: CartStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn add(product: ProductRef, variant: VariantLabel, qty: u32, price: Money) -> CartCommand {
        CartCommand::AddItem { product, variant, quantity: Quantity::new(qty), unit_price: price, available_stock: None }
    }

    fn assert_totals_consistent(cart: &Cart) {
        let items: u32 = cart.lines().iter().map(|l| l.quantity.value()).sum();
        let amount = cart.lines().iter().fold(dec!(0), |acc, l| acc + l.unit_price.amount() * rust_decimal::Decimal::from(l.quantity.value()));
        assert_eq!(cart.total_items().value(), items);
        assert_eq!(cart.total_amount().amount(), amount);
    }

    #[test]
    fn test_add_merges_and_reprices() {
        let mut cart = Cart::open(OwnerId::new());
        let p = ProductRef::new();
        cart.apply(add(p, VariantLabel::none(), 2, Money::new(dec!(10)))).unwrap();
        cart.apply(add(p, VariantLabel::none(), 1, Money::new(dec!(12)))).unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, Quantity::new(3));
        assert_eq!(cart.total_amount().amount(), dec!(36));
        assert_totals_consistent(&cart);
    }

    #[test]
    fn test_variants_are_separate_lines() {
        let mut cart = Cart::open(OwnerId::new());
        let p = ProductRef::new();
        cart.apply(add(p, VariantLabel::named("Large"), 1, Money::new(dec!(15)))).unwrap();
        cart.apply(add(p, VariantLabel::none(), 1, Money::new(dec!(10)))).unwrap();
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.total_items(), Quantity::new(2));
    }

    #[test]
    fn test_update_uses_stored_price_and_zero_removes() {
        let mut cart = Cart::open(OwnerId::new());
        let (a, b) = (ProductRef::new(), ProductRef::new());
        cart.apply(add(a, VariantLabel::none(), 2, Money::new(dec!(10)))).unwrap();
        cart.apply(add(b, VariantLabel::none(), 1, Money::new(dec!(4.5)))).unwrap();
        cart.apply(CartCommand::UpdateQuantity { product: a, variant: VariantLabel::from(None), quantity: Quantity::new(5) }).unwrap();
        assert_eq!(cart.find_line(a, &VariantLabel::none()).unwrap().line_total.amount(), dec!(50));
        cart.apply(CartCommand::UpdateQuantity { product: a, variant: VariantLabel::none(), quantity: Quantity::new(0) }).unwrap();
        assert!(cart.find_line(a, &VariantLabel::none()).is_none());
        assert_eq!(cart.total_items(), Quantity::new(1));
        assert_totals_consistent(&cart);
    }

    #[test]
    fn test_missing_line_errors() {
        let mut cart = Cart::open(OwnerId::new());
        let p = ProductRef::new();
        let err = cart.apply(CartCommand::RemoveItem { product: p, variant: VariantLabel::none() }).unwrap_err();
        assert!(matches!(err, CartError::ItemNotFound { .. }));
        assert_eq!(cart.apply(CartCommand::Clear).unwrap_err(), CartError::EmptyCart);
    }

    #[test]
    fn test_stock_caps_merged_quantity() {
        let mut cart = Cart::open(OwnerId::new());
        let p = ProductRef::new();
        let cmd = |q| CartCommand::AddItem { product: p, variant: VariantLabel::none(), quantity: Quantity::new(q), unit_price: Money::new(dec!(1)), available_stock: Some(3) };
        cart.apply(cmd(2)).unwrap();
        assert_eq!(cart.apply(cmd(2)).unwrap_err(), CartError::InsufficientStock { requested: 4, available: 3 });
        assert_eq!(cart.total_items(), Quantity::new(2));
    }

    #[test]
    fn test_processing_cart_rejects_mutation() {
        let mut cart = Cart::open(OwnerId::new());
        let p = ProductRef::new();
        cart.apply(add(p, VariantLabel::none(), 1, Money::new(dec!(10)))).unwrap();
        cart.mark_processing(OrderId::new()).unwrap();
        let before = cart.lines().to_vec();
        for cmd in [
            add(p, VariantLabel::none(), 1, Money::new(dec!(10))),
            CartCommand::UpdateQuantity { product: p, variant: VariantLabel::none(), quantity: Quantity::new(4) },
            CartCommand::RemoveItem { product: p, variant: VariantLabel::none() },
            CartCommand::Clear,
        ] {
            assert_eq!(cart.apply(cmd).unwrap_err(), CartError::NotModifiable { status: CartStatus::Processing });
        }
        assert_eq!(cart.lines(), before.as_slice());
    }

    #[test]
    fn test_status_machine() {
        let mut cart = Cart::open(OwnerId::new());
        assert!(cart.mark_processing(OrderId::new()).is_err());
        cart.apply(add(ProductRef::new(), VariantLabel::none(), 1, Money::new(dec!(1)))).unwrap();
        let order = OrderId::new();
        cart.mark_processing(order).unwrap();
        assert_eq!(cart.linked_order(), Some(order));
        assert!(cart.revert_to_active());
        assert_eq!(cart.linked_order(), None);
        cart.mark_processing(order).unwrap();
        cart.mark_completed().unwrap();
        assert!(!cart.revert_to_active());
        assert_eq!(cart.status(), CartStatus::Completed);
    }
}
