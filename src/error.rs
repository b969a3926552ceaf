//! Service-level error taxonomy.

use thiserror::Error;
use crate::domain::aggregates::{CartError, CartStatus, OrderError, PaymentStatus};
use crate::domain::value_objects::ProductRef;
use crate::ports::{CatalogError, GatewayError, StoreError};

/// How an error should be surfaced; the HTTP layer maps each kind to one status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind { Validation, NotFound, DomainState, Unauthorized, RateLimited, Upstream, Fatal }

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("product {0} not found")]
    ProductNotFound(ProductRef),

    #[error("product {0} is not available")]
    ProductUnavailable(ProductRef),

    #[error("product variant not found")]
    VariantNotFound,

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("no cart available for checkout")]
    NoCart,

    #[error("order not found")]
    OrderNotFound,

    #[error("payment intent not found")]
    PaymentIntentNotFound,

    #[error("unauthorized access to order")]
    Unauthorized,

    #[error("too many cart operations, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl EcommerceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::VariantNotFound => ErrorKind::Validation,
            Self::Cart(CartError::InvalidQuantity) => ErrorKind::Validation,
            Self::Order(OrderError::NegativeShipping) => ErrorKind::Validation,
            Self::ProductNotFound(_) | Self::OrderNotFound | Self::PaymentIntentNotFound => ErrorKind::NotFound,
            Self::Cart(CartError::ItemNotFound { .. }) => ErrorKind::NotFound,
            Self::ProductUnavailable(_) | Self::NoCart | Self::Cart(_) | Self::Order(_) => ErrorKind::DomainState,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Gateway(_) | Self::Catalog(_) => ErrorKind::Upstream,
            Self::Storage(_) => ErrorKind::Fatal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::ProductUnavailable(_) => "PRODUCT_UNAVAILABLE",
            Self::VariantNotFound => "VARIANT_NOT_FOUND",
            Self::Cart(e) => match e {
                CartError::NotModifiable { .. } => "CART_NOT_MODIFIABLE",
                CartError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
                CartError::EmptyCart => "EMPTY_CART",
                CartError::InvalidQuantity => "INVALID_QUANTITY",
                CartError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
                CartError::InvalidTransition { .. } => "INVALID_TRANSITION",
            },
            Self::Order(e) => match e {
                OrderError::NoItems => "NO_CART",
                OrderError::NegativeShipping => "VALIDATION_FAILED",
                OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
                OrderError::AlreadyCancelled => "ALREADY_CANCELLED",
                OrderError::InvalidPaymentState { .. } => "INVALID_STATE",
            },
            Self::NoCart => "NO_CART",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::PaymentIntentNotFound => "PAYMENT_INTENT_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Recovery hint for the client, where one exists.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Cart(CartError::NotModifiable { status: CartStatus::Processing }) => {
                Some("Complete or cancel the pending order before changing the cart")
            }
            Self::Cart(CartError::NotModifiable { .. }) => Some("Refresh the cart to start a new one"),
            Self::Cart(CartError::ItemNotFound { .. }) => Some("Refresh the cart; the item may already have been removed"),
            Self::NoCart => Some("Add items to the cart before checking out"),
            Self::Order(OrderError::InvalidPaymentState { status: PaymentStatus::Completed }) => {
                Some("This order has already been paid")
            }
            Self::RateLimited { .. } => Some("Slow down and retry shortly"),
            _ => None,
        }
    }

    /// Authoritative cart status to echo back, when the error is about it.
    pub fn cart_status(&self) -> Option<CartStatus> {
        match self {
            Self::Cart(CartError::NotModifiable { status }) => Some(*status),
            Self::Cart(CartError::InvalidTransition { from, .. }) => Some(*from),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
