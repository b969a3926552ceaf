//! Cozy Commerce
//!
//! Cart lifecycle, checkout and payment reconciliation for a storefront backend.
//!
//! ## Features
//! - One active cart per user, with purchase history kept as processing/completed carts
//! - Idempotent checkout that resumes the pending order after a payment redirect
//! - Payment-intent reconciliation driven only by the gateway-reported status
//! - Fire-and-forget cart and order notifications over NATS

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod ports;
pub mod services;

pub use config::{CheckoutConfig, Config, ConfigError};
pub use error::{EcommerceError, ErrorKind, Result};
