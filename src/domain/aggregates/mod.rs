//! Aggregates module
pub mod order;
pub mod cart;

pub use order::{Order, OrderError, OrderLine, OrderStatus, PaymentStatus, ShippingAddress};
pub use cart::{Cart, CartCommand, CartError, CartLine, CartStatus};
