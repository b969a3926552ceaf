//! Service configuration, read from the environment (after `.env` via dotenvy).

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8083;
pub const DEFAULT_TAX_RATE: &str = "0.08";
pub const DEFAULT_CURRENCY: &str = "usd";
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_SUBJECT_PREFIX: &str = "commerce.user";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitBackend { Memory, Postgres }

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub notify_subject_prefix: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub stripe_webhook_secret: Option<String>,
    pub checkout: CheckoutConfig,
    pub request_timeout: Duration,
    pub cart_ops_per_minute: u32,
    pub rate_limit_backend: RateLimitBackend,
}

/// Pricing policy applied when an order is created or refreshed.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckoutConfig {
    /// Flat rate as a fraction of the subtotal, e.g. `0.08`.
    pub tax_rate: Decimal,
    pub currency: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self { Self { tax_rate: Decimal::new(8, 2), currency: DEFAULT_CURRENCY.to_string() } }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let tax_rate: Decimal = parse(&get, "TAX_RATE", DEFAULT_TAX_RATE)?;
        if tax_rate.is_sign_negative() || tax_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid { var: "TAX_RATE", reason: format!("{tax_rate} is outside [0, 1)") });
        }
        let currency = non_empty("CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()).to_lowercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid { var: "CURRENCY", reason: format!("`{currency}` is not an ISO 4217 code") });
        }
        let rate_limit_backend = match non_empty("RATE_LIMIT_BACKEND").as_deref() {
            None | Some("memory") => RateLimitBackend::Memory,
            Some("postgres") => RateLimitBackend::Postgres,
            Some(other) => return Err(ConfigError::Invalid { var: "RATE_LIMIT_BACKEND", reason: format!("unknown backend `{other}`") }),
        };
        let database_url = non_empty("DATABASE_URL");
        if rate_limit_backend == RateLimitBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Invalid { var: "RATE_LIMIT_BACKEND", reason: "postgres backend requires DATABASE_URL".into() });
        }
        let timeout_secs: u64 = parse(&get, "REQUEST_TIMEOUT_SECS", "30")?;

        Ok(Self {
            port: parse(&get, "PORT", &DEFAULT_PORT.to_string())?,
            database_url,
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", "10")?,
            nats_url: non_empty("NATS_URL"),
            notify_subject_prefix: non_empty("NOTIFY_SUBJECT_PREFIX").unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_string()),
            stripe_secret_key: non_empty("STRIPE_SECRET_KEY"),
            stripe_api_base: non_empty("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            stripe_webhook_secret: non_empty("STRIPE_WEBHOOK_SECRET"),
            checkout: CheckoutConfig { tax_rate, currency },
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
            cart_ops_per_minute: parse(&get, "CART_OPS_PER_MINUTE", "30")?,
            rate_limit_backend,
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = get(var).filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string());
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid { var, reason: format!("`{raw}`: {e}") })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.checkout, CheckoutConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.cart_ops_per_minute, 30);
        assert_eq!(config.rate_limit_backend, RateLimitBackend::Memory);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_tax_rate_override_and_bounds() {
        let config = config_from(&[("TAX_RATE", "0")]).unwrap();
        assert!(config.checkout.tax_rate.is_zero());
        assert!(matches!(config_from(&[("TAX_RATE", "1.5")]), Err(ConfigError::Invalid { var: "TAX_RATE", .. })));
        assert!(config_from(&[("TAX_RATE", "abc")]).is_err());
    }

    #[test]
    fn test_postgres_limiter_needs_database() {
        assert!(config_from(&[("RATE_LIMIT_BACKEND", "postgres")]).is_err());
        let config = config_from(&[("RATE_LIMIT_BACKEND", "postgres"), ("DATABASE_URL", "postgres://localhost/shop")]).unwrap();
        assert_eq!(config.rate_limit_backend, RateLimitBackend::Postgres);
    }

    #[test]
    fn test_bad_port() {
        assert!(matches!(config_from(&[("PORT", "http")]), Err(ConfigError::Invalid { var: "PORT", .. })));
    }
}
