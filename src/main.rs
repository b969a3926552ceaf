//! Cozy Commerce - cart, checkout and payment service

use anyhow::Result;
use cozy_commerce::api::{self, AppState, Backends};
use cozy_commerce::config::{Config, RateLimitBackend};
use cozy_commerce::infrastructure::{
    FixedWindowLimiter, InMemoryCatalog, MemoryStore, NatsNotifier, NoopNotifier, PgCatalog, PgRateLimiter, PgStore,
    SimulatedGateway, StripeGateway, WebhookVerifier,
};
use cozy_commerce::ports::{Notifier, PaymentGateway, RateLimiter};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let pool = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Some(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, carts and orders are kept in memory and lost on restart");
            None
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsNotifier::new(client, config.notify_subject_prefix.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, notifications disabled");
                Arc::new(NoopNotifier)
            }
        },
        None => Arc::new(NoopNotifier),
    };

    let gateway: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeGateway::new(key.clone(), config.stripe_api_base.clone())?),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, using the simulated payment gateway");
            Arc::new(SimulatedGateway::new())
        }
    };

    let rate_limiter: Arc<dyn RateLimiter> = match (config.rate_limit_backend, &pool) {
        (RateLimitBackend::Postgres, Some(db)) => Arc::new(PgRateLimiter::new(db.clone(), config.cart_ops_per_minute, RATE_WINDOW)),
        _ => Arc::new(FixedWindowLimiter::new(config.cart_ops_per_minute, RATE_WINDOW)),
    };

    let backends = match pool {
        Some(db) => {
            let store = Arc::new(PgStore::new(db.clone()));
            Backends { carts: store.clone(), orders: store, catalog: Arc::new(PgCatalog::new(db)), gateway, notifier, rate_limiter }
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            Backends { carts: store.clone(), orders: store, catalog: Arc::new(InMemoryCatalog::new()), gateway, notifier, rate_limiter }
        }
    };

    let webhook = config.stripe_webhook_secret.clone().map(WebhookVerifier::new);
    let state = AppState::new(backends, config.checkout.clone(), webhook);
    let app = api::router(state, config.request_timeout);

    tracing::info!(port = config.port, tax_rate = %config.checkout.tax_rate, currency = %config.checkout.currency, "🚀 Cozy Commerce listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
