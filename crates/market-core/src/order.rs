//! # Order Types
//!
//! One order per (buyer, seller, product). Orders move along
//!
//! ```text
//!   PENDING ──▶ PAID ──▶ SHIPPED ──▶ DELIVERED
//!      └──────▶ CANCELLED
//! ```
//!
//! and every edge is owned by exactly one kind of actor.

use crate::cart::ShippingMethod;
use crate::error::{MarketError, MarketResult};
use crate::money::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

/// Who is asking for a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Buyer,
    Seller,
    /// Payment settlement (webhook or finalizer)
    System,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Cancelled orders do not hold their product
    pub fn is_active(&self) -> bool {
        !matches!(self, OrderStatus::Cancelled)
    }

    /// Check an edge against the actor that wants to take it.
    ///
    /// Returns the new status, or `Forbidden` for any edge the actor does not own.
    pub fn transition(self, next: OrderStatus, actor: Actor) -> MarketResult<OrderStatus> {
        use OrderStatus::*;
        let allowed = match (self, next) {
            (Pending, Paid) => actor == Actor::System,
            (Paid, Shipped) => actor == Actor::Seller,
            (Shipped, Delivered) => actor == Actor::Buyer,
            (Pending, Cancelled) => matches!(actor, Actor::Buyer | Actor::Seller),
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(MarketError::Forbidden(format!(
                "{:?} cannot move order from {} to {}",
                actor,
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl FromStr for OrderStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> MarketResult<Self> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(MarketError::Storage(format!("unknown order status: {other}"))),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the orders to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole {
    #[default]
    Buyer,
    Seller,
}

/// A persisted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    pub payment_intent_id: String,
    pub status: OrderStatus,
    /// Item price plus shipping, smallest currency unit
    pub amount: i64,
    pub currency: Currency,
    pub shipping_method: ShippingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The caller's role on this order, if any
    pub fn actor_for(&self, user_id: Uuid) -> Option<Actor> {
        if user_id == self.buyer_id {
            Some(Actor::Buyer)
        } else if user_id == self.seller_id {
            Some(Actor::Seller)
        } else {
            None
        }
    }

    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            id: self.id,
            product_id: self.product_id,
            seller_id: self.seller_id,
            status: self.status,
            amount: self.amount,
            currency: self.currency,
        }
    }
}

/// Projection returned by checkout endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: Uuid,
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub status: OrderStatus,
    pub amount: i64,
    pub currency: Currency,
}

/// A conditional status change applied by the store
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTransition {
    /// Status the order must still be in
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub tracking_number: Option<String>,
}
