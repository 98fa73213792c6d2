//! # Addresses and Contact Details

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Shipping or billing address as submitted at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    #[validate(length(min = 1, max = 120, message = "full name is required"))]
    pub full_name: String,

    #[validate(length(min = 1, max = 200, message = "address line 1 is required"))]
    pub line1: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 200))]
    pub line2: Option<String>,

    #[validate(length(min = 1, max = 100, message = "city is required"))]
    pub city: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 100))]
    pub state: Option<String>,

    #[validate(length(min = 2, max = 20, message = "postal code is required"))]
    pub postal_code: String,

    /// ISO 3166-1 alpha-2
    #[validate(custom(function = "validate_country"))]
    pub country: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

fn validate_country(country: &str) -> Result<(), ValidationError> {
    if country.len() == 2 && country.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("country")
            .with_message("country must be a two-letter ISO code".into()))
    }
}

/// Persisted address snapshot, owned by a user and referenced by an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub details: AddressInput,
    pub created_at: DateTime<Utc>,
}

impl Address {
    pub fn snapshot(user_id: Uuid, details: AddressInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            details,
            created_at: Utc::now(),
        }
    }
}

/// Buyer contact details captured at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}
