//! Adapters for the ports in [`crate::ports`].

pub mod memory;
pub mod nats;
pub mod postgres;
pub mod rate_limit;
pub mod stripe;

pub use memory::{CatalogProduct, InMemoryCatalog, MemoryStore, SimulatedGateway};
pub use nats::{NatsNotifier, NoopNotifier};
pub use postgres::{PgCatalog, PgRateLimiter, PgStore};
pub use rate_limit::FixedWindowLimiter;
pub use stripe::{StripeGateway, WebhookError, WebhookEvent, WebhookVerifier};
