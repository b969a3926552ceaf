//! Value Objects for the cart and checkout domain

use chrono::Utc;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::now_v7()) }
            pub fn as_uuid(&self) -> Uuid { self.0 }
        }

        impl Default for $name { fn default() -> Self { Self::new() } }
        impl From<Uuid> for $name { fn from(id: Uuid) -> Self { Self(id) } }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    };
}

uuid_id!(
    /// Identity of the user owning carts and orders, issued by the auth layer.
    OwnerId
);
uuid_id!(CartId);
uuid_id!(OrderId);
uuid_id!(
    /// Opaque reference into the product catalog.
    ProductRef
);

/// Money value object. Single currency; the currency code lives in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn add(&self, other: Money) -> Money { Money(self.0 + other.0) }
    pub fn multiply(&self, qty: Quantity) -> Money { Money(self.0 * Decimal::from(qty.value())) }
    pub fn is_negative(&self) -> bool { self.0.is_sign_negative() && !self.0.is_zero() }

    /// `rate` applied to this amount, rounded half away from zero to cents.
    pub fn percentage(&self, rate: Decimal) -> Money {
        Money((self.0 * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Integer minor units (cents), as payment gateways expect.
    pub fn to_minor_units(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self { iter.fold(Money::ZERO, |acc, m| acc.add(m)) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self { iter.fold(Quantity(0), |acc, q| acc.add(q)) }
}

/// Selects a priced sub-SKU of a product.
///
/// There is exactly one representation of "no variant": blank and missing labels
/// both collapse to it, so line matching never has to reason about two kinds of absence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub struct VariantLabel(Option<String>);

impl VariantLabel {
    pub fn none() -> Self { Self(None) }

    pub fn named(label: impl Into<String>) -> Self { Self::from(Some(label.into())) }

    pub fn as_deref(&self) -> Option<&str> { self.0.as_deref() }
    pub fn is_none(&self) -> bool { self.0.is_none() }
}

impl From<Option<String>> for VariantLabel {
    fn from(label: Option<String>) -> Self {
        Self(label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()))
    }
}

impl From<VariantLabel> for Option<String> {
    fn from(label: VariantLabel) -> Self { label.0 }
}

impl fmt::Display for VariantLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 { Some(l) => write!(f, "{l}"), None => write!(f, "<none>") }
    }
}

/// Human-readable order identifier: `ORD-<unix millis>-<9 base-36 chars>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

impl OrderNumber {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..9).map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char).collect();
        Self(format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn parse(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_add() {
        let a = Money::new(dec!(100));
        let b = Money::new(dec!(50));
        assert_eq!(a.add(b).amount(), dec!(150));
    }

    #[test]
    fn test_money_percentage_rounds_to_cents() {
        assert_eq!(Money::new(dec!(20)).percentage(dec!(0.08)).amount(), dec!(1.6));
        assert_eq!(Money::new(dec!(10.05)).percentage(dec!(0.05)).amount(), dec!(0.50));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Money::new(dec!(26.6)).to_minor_units(), Some(2660));
        assert_eq!(Money::new(dec!(19.995)).to_minor_units(), Some(2000));
    }

    #[test]
    fn test_variant_absence_is_single_sentinel() {
        assert_eq!(VariantLabel::from(None), VariantLabel::none());
        assert_eq!(VariantLabel::from(Some("  ".to_string())), VariantLabel::none());
        assert_eq!(VariantLabel::named(" Large "), VariantLabel::named("Large"));
        let parsed: VariantLabel = serde_json::from_str("null").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_order_number_format() {
        let n = OrderNumber::generate();
        let parts: Vec<&str> = n.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
