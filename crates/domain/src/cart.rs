//! Cart snapshot contract read from the cart service.

use serde::{Deserialize, Deserializer, Serialize};

use crate::order::{Currency, ProductId};

/// One priced line of a cart.
///
/// Quantity and price stay signed here so that bad upstream data is reported
/// as a validation error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Resolved unit price in minor units.
    #[serde(alias = "price", alias = "unit_price_cents")]
    pub unit_price: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: i64, unit_price: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }
}

/// The priced contents of a user's or guest session's cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    #[serde(default)]
    pub items: Vec<CartLine>,
    /// Blank means "use the storefront default".
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub currency: Option<Currency>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<Currency>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(code) => Currency::parse(code)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl CartSnapshot {
    pub fn new(items: Vec<CartLine>) -> Self {
        Self {
            items,
            currency: None,
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
