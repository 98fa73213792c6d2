//! # Product Types
//!
//! Listings, their lifecycle and the search filter.
//!
//! ```text
//!   AVAILABLE ──reserve──▶ RESERVED ──pay──▶ SOLD
//!       │  ▲                   │
//!       │  └──────release──────┘
//!       └──remove──▶ REMOVED
//! ```

use crate::error::{MarketError, MarketResult};
use crate::money::{Currency, Price};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Listing lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    Available,
    Reserved,
    Sold,
    Removed,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Available => "AVAILABLE",
            ProductStatus::Reserved => "RESERVED",
            ProductStatus::Sold => "SOLD",
            ProductStatus::Removed => "REMOVED",
        }
    }

    /// The only edges a listing may take
    pub fn can_transition_to(self, next: ProductStatus) -> bool {
        use ProductStatus::*;
        matches!(
            (self, next),
            (Available, Reserved) | (Reserved, Sold) | (Reserved, Available) | (Available, Removed)
        )
    }

    pub fn ensure_transition(self, next: ProductStatus) -> MarketResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(MarketError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl FromStr for ProductStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> MarketResult<Self> {
        match s {
            "AVAILABLE" => Ok(ProductStatus::Available),
            "RESERVED" => Ok(ProductStatus::Reserved),
            "SOLD" => Ok(ProductStatus::Sold),
            "REMOVED" => Ok(ProductStatus::Removed),
            other => Err(MarketError::Storage(format!("unknown product status: {other}"))),
        }
    }
}

impl std::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item condition as declared by the seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCondition {
    New,
    LikeNew,
    #[default]
    Good,
    Fair,
    Poor,
}

impl ProductCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCondition::New => "NEW",
            ProductCondition::LikeNew => "LIKE_NEW",
            ProductCondition::Good => "GOOD",
            ProductCondition::Fair => "FAIR",
            ProductCondition::Poor => "POOR",
        }
    }
}

impl FromStr for ProductCondition {
    type Err = MarketError;

    fn from_str(s: &str) -> MarketResult<Self> {
        match s {
            "NEW" => Ok(ProductCondition::New),
            "LIKE_NEW" => Ok(ProductCondition::LikeNew),
            "GOOD" => Ok(ProductCondition::Good),
            "FAIR" => Ok(ProductCondition::Fair),
            "POOR" => Ok(ProductCondition::Poor),
            other => Err(MarketError::field(
                "condition",
                format!("unknown condition: {other}"),
            )),
        }
    }
}

/// A listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: Price,
    pub condition: ProductCondition,
    pub category: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_available(&self) -> bool {
        self.status == ProductStatus::Available
    }
}

/// Listing creation payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    #[validate(length(min = 1, max = 120, message = "title must be 1-120 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 5000, message = "description is too long"))]
    pub description: String,

    /// Price in the smallest currency unit
    #[validate(range(min = 1, max = 100_000_000, message = "price must be positive"))]
    pub price: i64,

    #[serde(default)]
    pub currency: Currency,

    #[serde(default)]
    pub condition: ProductCondition,

    #[validate(length(min = 1, max = 60, message = "category must be 1-60 characters"))]
    pub category: String,

    #[serde(default)]
    #[validate(
        length(max = 8, message = "at most 8 images"),
        custom(function = "validate_image_urls")
    )]
    pub images: Vec<String>,
}

fn validate_image_urls(images: &[String]) -> Result<(), ValidationError> {
    if images.iter().all(|u| u.starts_with("https://")) {
        Ok(())
    } else {
        Err(ValidationError::new("image_url").with_message("images must be https URLs".into()))
    }
}

/// Catalog query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    #[serde(default, alias = "q")]
    pub query: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub condition: Option<ProductCondition>,
    #[serde(default)]
    pub min_price: Option<i64>,
    #[serde(default)]
    pub max_price: Option<i64>,
    #[serde(default)]
    pub seller_id: Option<Uuid>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl ProductFilter {
    pub const DEFAULT_PER_PAGE: u32 = 24;
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn limit(&self) -> u32 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u32 {
        self.page.unwrap_or(0).saturating_mul(self.limit())
    }

    /// Non-empty, trimmed search text
    pub fn text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// In-process predicate, mirrors the SQL used by the database store
    pub fn matches(&self, product: &Product) -> bool {
        if product.status != ProductStatus::Available {
            return false;
        }
        if let Some(q) = self.text() {
            let q = q.to_lowercase();
            if !product.title.to_lowercase().contains(&q)
                && !product.description.to_lowercase().contains(&q)
            {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            if !product.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(condition) = self.condition {
            if product.condition != condition {
                return false;
            }
        }
        if let Some(min) = self.min_price {
            if product.price.amount < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if product.price.amount > max {
                return false;
            }
        }
        if let Some(seller) = self.seller_id {
            if product.seller_id != seller {
                return false;
            }
        }
        true
    }
}
