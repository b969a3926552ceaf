//! Cart Aggregate operations
//!
//! Every mutation is a [`CartCommand`] run against the owner's open cart under optimistic
//! concurrency: load, apply, compare-and-swap save, and on conflict re-read and re-apply.

use std::sync::Arc;
use tracing::instrument;
use crate::domain::aggregates::{Cart, CartCommand, CartError};
use crate::domain::events::CartEvent;
use crate::domain::value_objects::{OwnerId, ProductRef, Quantity, VariantLabel};
use crate::error::{EcommerceError, Result};
use crate::ports::{CartStore, CatalogLookup, OrderStore, Resolution, StoreError};
use crate::services::{complete_cart, linked_order, LinkedOrder, Notifications, MAX_ATTEMPTS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Healing { Untouched, Reverted, Completed }

#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogLookup>,
    notifications: Notifications,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartStore>, orders: Arc<dyn OrderStore>, catalog: Arc<dyn CatalogLookup>, notifications: Notifications) -> Self {
        Self { carts, orders, catalog, notifications }
    }

    /// The owner's open cart (active, or processing while a checkout is pending), creating an
    /// empty active cart when there is none.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, owner: OwnerId) -> Result<Cart> {
        match self.carts.find_open(owner).await? {
            Some(cart) => Ok(cart),
            None => self.create_active(owner).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn history(&self, owner: OwnerId) -> Result<Vec<Cart>> {
        Ok(self.carts.history(owner).await?)
    }

    /// Resolves the product now and merges into an existing line at the new price.
    #[instrument(skip(self))]
    pub async fn add_item(&self, owner: OwnerId, product: ProductRef, quantity: u32, variant: VariantLabel) -> Result<Cart> {
        if quantity < 1 { return Err(CartError::InvalidQuantity.into()); }
        let (unit_price, stock) = match self.catalog.resolve(product, &variant).await? {
            Resolution::NotFound => return Err(EcommerceError::ProductNotFound(product)),
            Resolution::Inactive => return Err(EcommerceError::ProductUnavailable(product)),
            Resolution::VariantNotFound => return Err(EcommerceError::VariantNotFound),
            Resolution::Available { unit_price, stock } => (unit_price, stock),
        };
        let command = CartCommand::AddItem { product, variant, quantity: Quantity::new(quantity), unit_price, available_stock: stock };
        self.execute(owner, command, true).await
    }

    /// Zero removes the line. The stored unit price is kept.
    #[instrument(skip(self))]
    pub async fn update_quantity(&self, owner: OwnerId, product: ProductRef, quantity: u32, variant: VariantLabel) -> Result<Cart> {
        self.execute(owner, CartCommand::UpdateQuantity { product, variant, quantity: Quantity::new(quantity) }, false).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, owner: OwnerId, product: ProductRef, variant: VariantLabel) -> Result<Cart> {
        self.execute(owner, CartCommand::RemoveItem { product, variant }, false).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, owner: OwnerId) -> Result<Cart> {
        self.execute(owner, CartCommand::Clear, false).await
    }

    async fn execute(&self, owner: OwnerId, command: CartCommand, create_if_missing: bool) -> Result<Cart> {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut cart = match self.carts.find_open(owner).await? {
                Some(cart) => cart,
                None if create_if_missing => self.create_active(owner).await?,
                // No cart yet: fail exactly as an empty one would, without persisting anything.
                None => return Err(Cart::open(owner).apply(command).err().unwrap_or(CartError::EmptyCart).into()),
            };
            let reverted = match self.heal(&mut cart).await? {
                Healing::Untouched => false,
                Healing::Reverted => true,
                // The paid cart left the open set; work on whatever is open now.
                Healing::Completed => continue,
            };
            let event = match cart.apply(command.clone()) {
                Ok(event) => event,
                Err(e) => {
                    if reverted { self.persist_revert(&cart).await; }
                    return Err(e.into());
                }
            };
            match self.carts.save(&cart).await {
                Ok(saved) => {
                    if reverted { self.notifications.emit(owner, CartEvent::Reverted { cart_id: saved.id() }).await; }
                    self.notifications.emit(owner, event).await;
                    return Ok(saved);
                }
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(%owner, attempt, %reason, "cart write conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(format!("cart update abandoned after {MAX_ATTEMPTS} attempts")).into())
    }

    /// A processing cart whose order was paid is completed; one whose order is gone, cancelled
    /// or failed becomes active again. A cart still awaiting payment is left alone.
    async fn heal(&self, cart: &mut Cart) -> Result<Healing> {
        if !cart.is_processing() { return Ok(Healing::Untouched); }
        match linked_order(self.orders.as_ref(), cart).await? {
            LinkedOrder::Payable(_) => Ok(Healing::Untouched),
            LinkedOrder::Settled(order_id) => {
                tracing::info!(cart_id = %cart.id(), %order_id, "completing processing cart whose order is paid");
                complete_cart(self.carts.as_ref(), &self.notifications, cart.clone(), order_id).await?;
                Ok(Healing::Completed)
            }
            LinkedOrder::Abandoned => {
                tracing::info!(cart_id = %cart.id(), "reverting abandoned processing cart to active");
                Ok(if cart.revert_to_active() { Healing::Reverted } else { Healing::Untouched })
            }
        }
    }

    async fn persist_revert(&self, cart: &Cart) {
        match self.carts.save(cart).await {
            Ok(saved) => self.notifications.emit(saved.owner(), CartEvent::Reverted { cart_id: saved.id() }).await,
            Err(e) => tracing::debug!(cart_id = %cart.id(), error = %e, "could not persist cart revert"),
        }
    }

    /// Relies on the store's single-active-cart constraint: losing the race means re-reading.
    async fn create_active(&self, owner: OwnerId) -> Result<Cart> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.carts.insert(&Cart::open(owner)).await {
                Ok(cart) => {
                    tracing::debug!(%owner, cart_id = %cart.id(), "created active cart");
                    return Ok(cart);
                }
                Err(StoreError::Conflict(reason)) => {
                    tracing::debug!(%owner, attempt, %reason, "concurrent cart creation, re-reading");
                    if let Some(cart) = self.carts.find_open(owner).await? { return Ok(cart); }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict(format!("could not create cart after {MAX_ATTEMPTS} attempts")).into())
    }
}
