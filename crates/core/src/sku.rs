//! Canonical stock-keeping unit code.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DomainError;

/// SKU code, trimmed and upper-cased.
///
/// Carts and upstream catalogues are inconsistent about casing and padding;
/// two spellings of the same code must compare equal once inside an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let canonical = raw.trim().to_uppercase();
        if canonical.is_empty() {
            return Err(DomainError::validation("sku must not be empty"));
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Sku {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Sku {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Deserialization canonicalizes too, so stored documents can never hold a
// non-canonical code.
impl<'de> Deserialize<'de> for Sku {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Sku::parse(&raw).map_err(serde::de::Error::custom)
    }
}
