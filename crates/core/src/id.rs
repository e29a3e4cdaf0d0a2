//! Strongly-typed identifiers used across the domain.
//!
//! Upstream services hand out opaque string ids (document ids, gateway ids),
//! so these wrap a `String` rather than a `Uuid`.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Human-readable order identifier (`ORD-YYYYMMDD-XXXXXXXX`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

/// Identifier of a buyer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Identifier of a fulfilling dealer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealerId(String);

/// Identifier of a catalogue product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

/// Payment identifier assigned by the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier, rejecting blank values.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{} must not be empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(OrderId, "OrderId");
impl_string_newtype!(UserId, "UserId");
impl_string_newtype!(DealerId, "DealerId");
impl_string_newtype!(ProductId, "ProductId");
impl_string_newtype!(PaymentId, "PaymentId");

impl OrderId {
    /// Generate a fresh order id for an order created at `now`.
    ///
    /// The suffix comes from the random tail of a UUIDv7, so ids created in the
    /// same second still differ.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let uuid = Uuid::now_v7();
        let simple = uuid.simple().to_string();
        let suffix = simple[simple.len() - 8..].to_ascii_uppercase();
        Self(format!("ORD-{}-{}", now.format("%Y%m%d"), suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_order_ids_are_readable_and_unique() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let a = OrderId::generate(now);
        let b = OrderId::generate(now);

        assert!(a.as_str().starts_with("ORD-20261019-"));
        assert_eq!(a.as_str().len(), "ORD-20261019-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn blank_ids_are_rejected() {
        assert!(matches!(DealerId::new("   "), Err(DomainError::InvalidId(_))));
        assert_eq!(DealerId::new(" D1 ").unwrap().as_str(), "D1");
    }

    #[test]
    fn ids_serialize_transparently() {
        let id: ProductId = "P1".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"P1\"");
    }
}
