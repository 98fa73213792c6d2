//! # Users
//!
//! Buyers and sellers are the same entity. Identity lives with the external
//! auth provider; this is the local mirror kept in sync by its webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    /// Auth provider user ID (e.g. `user_2abc...`)
    pub external_id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Connected payment account that receives seller payouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert input produced from a `user.created` / `user.updated` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSync {
    pub external_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub image_url: Option<String>,
}

impl User {
    pub fn from_sync(sync: UserSync) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: sync.external_id,
            email: sync.email,
            display_name: sync.display_name,
            image_url: sync.image_url,
            payout_account: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a profile update, keeping identity and payout settings
    pub fn apply_sync(&mut self, sync: UserSync) {
        self.email = sync.email;
        self.display_name = sync.display_name;
        self.image_url = sync.image_url;
        self.updated_at = Utc::now();
    }
}
