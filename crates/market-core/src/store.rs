//! # Marketplace Store
//!
//! Persistence seam for the marketplace. Every method that touches more than
//! one row is atomic: it either applies all of its writes or none of them.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   MarketStore (trait)                    │
//! │  ├── users / products / cart                            │
//! │  ├── reserve_for_intent()   AVAILABLE → RESERVED        │
//! │  ├── settle_payment()       webhook path                │
//! │  ├── finalize_checkout()    synchronous path            │
//! │  └── transition_order()     PAID → SHIPPED → DELIVERED  │
//! └──────────────────────────────────────────────────────────┘
//!               ▲                              ▲
//!       ┌───────┴───────┐              ┌───────┴───────┐
//!       │    PgStore    │              │  MemoryStore  │
//!       └───────────────┘              └───────────────┘
//! ```
//!
//! Status changes are conditional updates (`... WHERE status = $expected`),
//! never a read followed by a write, and `payments.external_id` is unique.

use crate::address::{Address, AddressInput};
use crate::cart::{CartItem, ShippingMethod};
use crate::error::MarketResult;
use crate::money::Currency;
use crate::order::{Order, OrderRole, OrderStatus, OrderTransition};
use crate::payment::{NewPayment, Payment};
use crate::product::{NewProduct, Product, ProductFilter, ProductStatus};
use crate::user::{User, UserSync};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// One product line of a checkout
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    /// Item price plus shipping for this line
    pub amount: i64,
}

/// Reserve products for a freshly created payment intent
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub buyer_id: Uuid,
    pub payment_intent_id: String,
    pub currency: Currency,
    pub shipping_method: ShippingMethod,
    pub lines: Vec<CheckoutLine>,
}

impl Reservation {
    /// One PENDING order per line
    pub fn pending_orders(&self) -> Vec<Order> {
        self.lines
            .iter()
            .map(|line| {
                line_order(
                    line,
                    self.buyer_id,
                    &self.payment_intent_id,
                    self.currency,
                    self.shipping_method,
                )
            })
            .collect()
    }
}

/// Webhook-driven settlement of a succeeded payment intent
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub payment: NewPayment,
    pub product_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// Orders moved to PAID in this call
    Settled(Vec<Order>),
    /// A payment with this external ID already exists; nothing changed
    AlreadyProcessed,
}

/// Synchronous finalization of a succeeded payment intent
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedCheckout {
    pub payment: NewPayment,
    pub shipping_address: AddressInput,
    pub shipping_method: ShippingMethod,
    pub lines: Vec<CheckoutLine>,
}

impl FinalizedCheckout {
    pub fn payment_intent_id(&self) -> &str {
        &self.payment.external_id
    }

    pub fn buyer_id(&self) -> Uuid {
        self.payment.buyer_id
    }

    /// A PAID order for a line that had no pending order
    pub fn paid_order(&self, line: &CheckoutLine, payment_id: Uuid, address_id: Uuid) -> Order {
        let mut order = line_order(
            line,
            self.payment.buyer_id,
            &self.payment.external_id,
            self.payment.currency,
            self.shipping_method,
        );
        order.status = OrderStatus::Paid;
        order.payment_id = Some(payment_id);
        order.address_id = Some(address_id);
        order
    }
}

fn line_order(
    line: &CheckoutLine,
    buyer_id: Uuid,
    payment_intent_id: &str,
    currency: Currency,
    shipping_method: ShippingMethod,
) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        buyer_id,
        seller_id: line.seller_id,
        product_id: line.product_id,
        address_id: None,
        payment_id: None,
        payment_intent_id: payment_intent_id.to_string(),
        status: OrderStatus::Pending,
        amount: line.amount,
        currency,
        shipping_method,
        tracking_number: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    pub orders: Vec<Order>,
    /// False when the payment had already been recorded (replay or webhook first)
    pub created: bool,
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    // -- users --------------------------------------------------------------

    /// Insert or update by external ID
    async fn upsert_user(&self, sync: UserSync) -> MarketResult<User>;

    /// Returns false when no such user existed
    async fn delete_user(&self, external_id: &str) -> MarketResult<bool>;

    async fn user_by_external_id(&self, external_id: &str) -> MarketResult<Option<User>>;

    async fn users_by_ids(&self, ids: &[Uuid]) -> MarketResult<Vec<User>>;

    async fn set_payout_account(&self, user_id: Uuid, account: &str) -> MarketResult<User>;

    // -- products -----------------------------------------------------------

    async fn create_product(&self, seller_id: Uuid, product: NewProduct) -> MarketResult<Product>;

    async fn product(&self, id: Uuid) -> MarketResult<Option<Product>>;

    /// Order of the result follows `ids`; missing IDs are skipped
    async fn products_by_ids(&self, ids: &[Uuid]) -> MarketResult<Vec<Product>>;

    /// Available listings matching the filter, newest first
    async fn list_products(&self, filter: &ProductFilter) -> MarketResult<Vec<Product>>;

    /// Conditional status change; `Conflict` if the product is no longer in `from`
    async fn transition_product(
        &self,
        id: Uuid,
        from: ProductStatus,
        to: ProductStatus,
    ) -> MarketResult<Product>;

    // -- cart ---------------------------------------------------------------

    async fn cart_items(&self, user_id: Uuid) -> MarketResult<Vec<CartItem>>;

    /// `Conflict("already in cart")` on duplicates
    async fn add_cart_item(&self, user_id: Uuid, product_id: Uuid) -> MarketResult<CartItem>;

    async fn remove_cart_item(&self, user_id: Uuid, product_id: Uuid) -> MarketResult<bool>;

    // -- checkout -----------------------------------------------------------

    /// AVAILABLE → RESERVED for every line and one PENDING order per line
    async fn reserve_for_intent(&self, reservation: Reservation) -> MarketResult<Vec<Order>>;

    /// PENDING orders of the intent → CANCELLED, their products back to AVAILABLE
    async fn release_reservation(&self, payment_intent_id: &str) -> MarketResult<Vec<Order>>;

    /// Record the payment and move the intent's pending orders to PAID and
    /// their products to SOLD
    async fn settle_payment(&self, settlement: Settlement) -> MarketResult<SettleOutcome>;

    /// Record the payment, snapshot the shipping address per line and make
    /// every line a PAID order with a SOLD product
    async fn finalize_checkout(&self, checkout: FinalizedCheckout)
        -> MarketResult<FinalizeOutcome>;

    async fn payment_by_external_id(&self, external_id: &str) -> MarketResult<Option<Payment>>;

    // -- orders -------------------------------------------------------------

    async fn order(&self, id: Uuid) -> MarketResult<Option<Order>>;

    async fn orders_for_user(&self, user_id: Uuid, role: OrderRole) -> MarketResult<Vec<Order>>;

    async fn orders_for_payment_intent(&self, payment_intent_id: &str) -> MarketResult<Vec<Order>>;

    async fn addresses_for_user(&self, user_id: Uuid) -> MarketResult<Vec<Address>>;

    /// Conditional on `change.from`; a cancellation also releases the product
    async fn transition_order(&self, id: Uuid, change: OrderTransition) -> MarketResult<Order>;
}

/// Shared, dynamically dispatched store
pub type SharedStore = Arc<dyn MarketStore>;
