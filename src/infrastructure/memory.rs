//! In-process adapters for local development and tests.
//!
//! [`MemoryStore`] enforces the same constraints as the PostgreSQL schema: one active cart per
//! owner, compare-and-swap on `version`, unique order numbers and payment intent references.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartStatus, Order};
use crate::domain::value_objects::{CartId, Money, OrderId, OrderNumber, OwnerId, ProductRef, VariantLabel};
use crate::ports::{
    CartStore, CatalogError, CatalogLookup, GatewayError, IntentRequest, IntentStatus, OrderStore, Page,
    PaymentGateway, PaymentIntent, Resolution, StoreError,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    carts: RwLock<HashMap<CartId, Cart>>,
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Every cart the owner has, in no particular order.
    pub async fn carts_of(&self, owner: OwnerId) -> Vec<Cart> {
        self.carts.read().await.values().filter(|c| c.owner == owner).cloned().collect()
    }
}

fn active_conflict(carts: &HashMap<CartId, Cart>, cart: &Cart) -> bool {
    cart.status == CartStatus::Active
        && carts.values().any(|c| c.owner == cart.owner && c.status == CartStatus::Active && c.id != cart.id)
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn find_open(&self, owner: OwnerId) -> Result<Option<Cart>, StoreError> {
        let carts = self.carts.read().await;
        let mine = || carts.values().filter(move |c| c.owner == owner);
        Ok(mine().find(|c| c.status == CartStatus::Active)
            .or_else(|| mine().filter(|c| c.status == CartStatus::Processing).max_by_key(|c| c.updated_at))
            .cloned())
    }

    async fn find_by_order(&self, order: OrderId) -> Result<Option<Cart>, StoreError> {
        Ok(self.carts.read().await.values().find(|c| c.linked_order == Some(order)).cloned())
    }

    async fn history(&self, owner: OwnerId) -> Result<Vec<Cart>, StoreError> {
        let mut carts: Vec<Cart> = self.carts.read().await.values()
            .filter(|c| c.owner == owner && c.status != CartStatus::Active)
            .cloned().collect();
        carts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(carts)
    }

    async fn insert(&self, cart: &Cart) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        if carts.contains_key(&cart.id) { return Err(StoreError::Conflict(format!("cart {} exists", cart.id))); }
        if active_conflict(&carts, cart) { return Err(StoreError::Conflict("owner already has an active cart".into())); }
        let mut stored = cart.clone();
        stored.version = 1;
        carts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save(&self, cart: &Cart) -> Result<Cart, StoreError> {
        let mut carts = self.carts.write().await;
        let current = carts.get(&cart.id).ok_or_else(|| StoreError::Backend(format!("cart {} does not exist", cart.id)))?;
        if current.version != cart.version { return Err(StoreError::Conflict("stale cart version".into())); }
        if active_conflict(&carts, cart) { return Err(StoreError::Conflict("owner already has an active cart".into())); }
        let mut stored = cart.clone();
        stored.version += 1;
        carts.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<Order, StoreError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) || orders.values().any(|o| o.order_number == order.order_number) {
            return Err(StoreError::Conflict(format!("order {} exists", order.order_number)));
        }
        let mut stored = order.clone();
        stored.version = 1;
        orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save(&self, order: &Order) -> Result<Order, StoreError> {
        let mut orders = self.orders.write().await;
        let current = orders.get(&order.id).ok_or_else(|| StoreError::Backend(format!("order {} does not exist", order.id)))?;
        if current.version != order.version { return Err(StoreError::Conflict("stale order version".into())); }
        if let Some(intent) = &order.payment_intent {
            if orders.values().any(|o| o.id != order.id && o.payment_intent.as_ref() == Some(intent)) {
                return Err(StoreError::Conflict(format!("payment intent {intent} already linked")));
            }
        }
        let mut stored = order.clone();
        stored.version += 1;
        orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.values().find(|o| &o.order_number == number).cloned())
    }

    async fn find_by_payment_intent(&self, intent: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.values().find(|o| o.payment_intent.as_deref() == Some(intent)).cloned())
    }

    async fn list_for_owner(&self, owner: OwnerId, page: Page) -> Result<(Vec<Order>, u64), StoreError> {
        let mut mine: Vec<Order> = self.orders.read().await.values().filter(|o| o.owner == owner).cloned().collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = mine.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        Ok((mine.into_iter().skip(offset).take(page.per_page as usize).collect(), total))
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Clone, Debug)]
pub struct CatalogVariant { pub name: String, pub price: Money, pub stock: Option<u32> }

#[derive(Clone, Debug)]
pub struct CatalogProduct { pub is_active: bool, pub price: Money, pub stock: Option<u32>, pub variants: Vec<CatalogVariant> }

impl CatalogProduct {
    pub fn active(price: Money) -> Self { Self { is_active: true, price, stock: None, variants: vec![] } }
    pub fn with_stock(mut self, stock: u32) -> Self { self.stock = Some(stock); self }
    pub fn with_variant(mut self, name: impl Into<String>, price: Money, stock: Option<u32>) -> Self {
        self.variants.push(CatalogVariant { name: name.into(), price, stock });
        self
    }
    pub fn inactive(mut self) -> Self { self.is_active = false; self }

    pub fn resolve(&self, variant: &VariantLabel) -> Resolution {
        if !self.is_active { return Resolution::Inactive; }
        match variant.as_deref() {
            None => Resolution::Available { unit_price: self.price, stock: self.stock },
            Some(name) => self.variants.iter().find(|v| v.name == name)
                .map_or(Resolution::VariantNotFound, |v| Resolution::Available { unit_price: v.price, stock: v.stock }),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductRef, CatalogProduct>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub async fn upsert(&self, product: ProductRef, entry: CatalogProduct) {
        self.products.write().await.insert(product, entry);
    }
}

#[async_trait]
impl CatalogLookup for InMemoryCatalog {
    async fn resolve(&self, product: ProductRef, variant: &VariantLabel) -> Result<Resolution, CatalogError> {
        Ok(self.products.read().await.get(&product).map_or(Resolution::NotFound, |p| p.resolve(variant)))
    }
}

// =============================================================================
// Payment gateway
// =============================================================================

/// Gateway stand-in: intents start at `requires_payment_method` and move only via [`SimulatedGateway::set_status`].
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    intents: RwLock<HashMap<String, PaymentIntent>>,
    by_idempotency_key: RwLock<HashMap<String, String>>,
    unavailable: RwLock<bool>,
}

impl SimulatedGateway {
    pub fn new() -> Self { Self::default() }

    pub async fn set_status(&self, intent_id: &str, status: IntentStatus) -> bool {
        match self.intents.write().await.get_mut(intent_id) {
            Some(intent) => { intent.status = status; true }
            None => false,
        }
    }

    /// Makes every call fail as if the gateway were unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) { *self.unavailable.write().await = unavailable; }

    pub async fn intent_count(&self) -> usize { self.intents.read().await.len() }

    async fn check_available(&self) -> Result<(), GatewayError> {
        if *self.unavailable.read().await { Err(GatewayError::Unavailable("simulated outage".into())) } else { Ok(()) }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        self.check_available().await?;
        if request.amount_minor <= 0 {
            return Err(GatewayError::Rejected { status: 400, message: "amount must be positive".into() });
        }
        let mut keys = self.by_idempotency_key.write().await;
        let mut intents = self.intents.write().await;
        if let Some(existing) = keys.get(&request.idempotency_key).and_then(|id| intents.get(id)) {
            return Ok(existing.clone());
        }
        let id = format!("pi_sim_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            id: id.clone(),
            status: IntentStatus::RequiresPaymentMethod,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            metadata: request.metadata.clone(),
        };
        keys.insert(request.idempotency_key.clone(), id.clone());
        intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, id: &str) -> Result<Option<PaymentIntent>, GatewayError> {
        self.check_available().await?;
        Ok(self.intents.read().await.get(id).cloned())
    }

    async fn cancel_intent(&self, id: &str) -> Result<Option<PaymentIntent>, GatewayError> {
        self.check_available().await?;
        let mut intents = self.intents.write().await;
        let Some(intent) = intents.get_mut(id) else { return Ok(None) };
        if intent.status == IntentStatus::Succeeded {
            return Err(GatewayError::Rejected { status: 400, message: format!("intent {id} has already succeeded") });
        }
        intent.status = IntentStatus::Canceled;
        Ok(Some(intent.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::CartCommand;
    use crate::domain::value_objects::Quantity;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_single_active_cart_per_owner() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        CartStore::insert(&store, &Cart::open(owner)).await.unwrap();
        assert!(matches!(CartStore::insert(&store, &Cart::open(owner)).await, Err(StoreError::Conflict(_))));
        CartStore::insert(&store, &Cart::open(OwnerId::new())).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let mut cart = CartStore::insert(&store, &Cart::open(OwnerId::new())).await.unwrap();
        let mut stale = cart.clone();
        cart.apply(CartCommand::AddItem {
            product: ProductRef::new(), variant: VariantLabel::none(), quantity: Quantity::new(1),
            unit_price: Money::new(dec!(1)), available_stock: None,
        }).unwrap();
        let saved = CartStore::save(&store, &cart).await.unwrap();
        assert_eq!(saved.version(), 2);
        stale.updated_at = chrono::Utc::now();
        assert!(matches!(CartStore::save(&store, &stale).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_catalog_variants() {
        let catalog = InMemoryCatalog::new();
        let p = ProductRef::new();
        catalog.upsert(p, CatalogProduct::active(Money::new(dec!(10))).with_variant("Large", Money::new(dec!(14)), Some(2))).await;
        assert_eq!(catalog.resolve(p, &VariantLabel::named("Large")).await.unwrap(),
            Resolution::Available { unit_price: Money::new(dec!(14)), stock: Some(2) });
        assert_eq!(catalog.resolve(p, &VariantLabel::named("Tiny")).await.unwrap(), Resolution::VariantNotFound);
        assert_eq!(catalog.resolve(ProductRef::new(), &VariantLabel::none()).await.unwrap(), Resolution::NotFound);
    }

    #[tokio::test]
    async fn test_gateway_idempotency_key() {
        let gateway = SimulatedGateway::new();
        let request = IntentRequest { amount_minor: 500, currency: "usd".into(), metadata: BTreeMap::new(), idempotency_key: "k1".into() };
        let a = gateway.create_intent(&request).await.unwrap();
        let b = gateway.create_intent(&request).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(gateway.intent_count().await, 1);
    }

    #[tokio::test]
    async fn test_gateway_cancel_rules() {
        let gateway = SimulatedGateway::new();
        let request = IntentRequest { amount_minor: 500, currency: "usd".into(), metadata: BTreeMap::new(), idempotency_key: "k1".into() };
        let open = gateway.create_intent(&request).await.unwrap();
        let cancelled = gateway.cancel_intent(&open.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, IntentStatus::Canceled);
        assert!(gateway.cancel_intent("pi_unknown").await.unwrap().is_none());

        let paid = gateway.create_intent(&IntentRequest { idempotency_key: "k2".into(), ..request }).await.unwrap();
        gateway.set_status(&paid.id, IntentStatus::Succeeded).await;
        assert!(matches!(gateway.cancel_intent(&paid.id).await, Err(GatewayError::Rejected { status: 400, .. })));
    }
}
