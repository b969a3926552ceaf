#![allow(dead_code)]

use async_trait::async_trait;
use cozy_commerce::api::{AppState, Backends};
use cozy_commerce::config::CheckoutConfig;
use cozy_commerce::domain::events::DomainEvent;
use cozy_commerce::domain::value_objects::{Money, OwnerId, ProductRef};
use cozy_commerce::infrastructure::{CatalogProduct, FixedWindowLimiter, InMemoryCatalog, MemoryStore, SimulatedGateway, WebhookVerifier};
use cozy_commerce::ports::{Notifier, NotifyError, RateDecision, RateLimiter, StoreError};
use cozy_commerce::services::{CartService, CheckoutService, Notifications, PaymentService};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Records every published event; can be switched to fail every publish.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(OwnerId, DomainEvent)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }
    pub async fn events(&self) -> Vec<(OwnerId, DomainEvent)> { self.events.lock().await.clone() }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, owner: OwnerId, event: &DomainEvent) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) { return Err(NotifyError("broker down".into())); }
        self.events.lock().await.push((owner, event.clone()));
        Ok(())
    }
}

/// Limiter whose backing store is always down.
pub struct UnavailableLimiter;

#[async_trait]
impl RateLimiter for UnavailableLimiter {
    async fn hit(&self, _key: &str) -> Result<RateDecision, StoreError> {
        Err(StoreError::Backend("rate limit table unreachable".into()))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub gateway: Arc<SimulatedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let gateway = Arc::new(SimulatedGateway::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let notifications = Notifications::new(notifier.clone());
        let config = CheckoutConfig::default();
        Self {
            carts: CartService::new(store.clone(), store.clone(), catalog.clone(), notifications.clone()),
            checkout: CheckoutService::new(store.clone(), store.clone(), gateway.clone(), notifications.clone(), config.clone()),
            payments: PaymentService::new(store.clone(), store.clone(), gateway.clone(), notifications, config.currency),
            store, catalog, gateway, notifier,
        }
    }

    /// Router state over the same adapters, with a tight rate limit for the HTTP tests.
    pub fn app_state(&self, ops_per_minute: u32) -> AppState {
        self.app_state_with(Arc::new(FixedWindowLimiter::new(ops_per_minute, Duration::from_secs(60))))
    }

    pub fn app_state_with(&self, rate_limiter: Arc<dyn RateLimiter>) -> AppState {
        let backends = Backends {
            carts: self.store.clone(),
            orders: self.store.clone(),
            catalog: self.catalog.clone(),
            gateway: self.gateway.clone(),
            notifier: self.notifier.clone(),
            rate_limiter,
        };
        AppState::new(backends, CheckoutConfig::default(), Some(WebhookVerifier::new(WEBHOOK_SECRET)))
    }

    pub async fn product(&self, price: Decimal) -> ProductRef {
        self.stock(CatalogProduct::active(Money::new(price))).await
    }

    pub async fn stock(&self, entry: CatalogProduct) -> ProductRef {
        let product = ProductRef::new();
        self.catalog.upsert(product, entry).await;
        product
    }
}

pub fn money(amount: Decimal) -> Money { Money::new(amount) }
