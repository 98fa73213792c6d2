//! # Cart and Checkout Costs

use crate::error::{MarketError, MarketResult};
use crate::money::{Currency, Price};
use crate::product::Product;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A product sitting in a user's cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub added_at: DateTime<Utc>,
}

/// Shipping option chosen at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    #[default]
    Standard,
    Express,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Standard => "standard",
            ShippingMethod::Express => "express",
        }
    }

    /// Fee charged per order (each item ships separately from its seller)
    pub fn fee_per_item(&self) -> i64 {
        match self {
            ShippingMethod::Standard => 0,
            ShippingMethod::Express => 1500,
        }
    }
}

impl FromStr for ShippingMethod {
    type Err = MarketError;

    fn from_str(s: &str) -> MarketResult<Self> {
        match s {
            "standard" => Ok(ShippingMethod::Standard),
            "express" => Ok(ShippingMethod::Express),
            other => Err(MarketError::field(
                "shippingMethod",
                format!("unknown shipping method: {other}"),
            )),
        }
    }
}

/// Totals for a checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCosts {
    pub subtotal: i64,
    pub shipping: i64,
    pub total: i64,
    pub currency: Currency,
}

impl CheckoutCosts {
    /// Sum item prices and shipping. All products must share one currency.
    pub fn for_products(products: &[Product], method: ShippingMethod) -> MarketResult<Self> {
        let first = products
            .first()
            .ok_or_else(|| MarketError::InvalidRequest("cart is empty".to_string()))?;
        let currency = first.price.currency;

        if let Some(other) = products.iter().find(|p| p.price.currency != currency) {
            return Err(MarketError::InvalidRequest(format!(
                "cart mixes currencies ({} and {})",
                currency, other.price.currency
            )));
        }

        let subtotal: i64 = products.iter().map(|p| p.price.amount).sum();
        let shipping = method.fee_per_item() * products.len() as i64;

        Ok(Self {
            subtotal,
            shipping,
            total: subtotal + shipping,
            currency,
        })
    }

    /// Amount charged for one product line (item price plus its shipping fee)
    pub fn line_amount(product: &Product, method: ShippingMethod) -> i64 {
        product.price.amount + method.fee_per_item()
    }

    pub fn total_price(&self) -> Price {
        Price::from_cents(self.total, self.currency)
    }
}
