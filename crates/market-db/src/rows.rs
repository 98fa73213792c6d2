//! Row types for runtime `query_as` and their conversion into domain types.
//!
//! Status and enum columns are `TEXT` with `CHECK` constraints; a value that
//! fails to parse here means the database holds something the schema should
//! have rejected, reported as `MarketError::Storage`.

use chrono::{DateTime, Utc};
use market_core::{
    Address, AddressInput, CartItem, MarketError, MarketResult, Order, Payment, Price, Product,
    User,
};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

pub(crate) const USER_COLUMNS: &str =
    "id, external_id, email, display_name, image_url, payout_account, created_at, updated_at";

pub(crate) const PRODUCT_COLUMNS: &str = "id, seller_id, title, description, price, currency, \
     condition, category, images, status, created_at, updated_at";

pub(crate) const ORDER_COLUMNS: &str = "id, buyer_id, seller_id, product_id, address_id, \
     payment_id, payment_intent_id, status, amount, currency, shipping_method, tracking_number, \
     created_at, updated_at";

pub(crate) const PAYMENT_COLUMNS: &str =
    "id, external_id, buyer_id, amount, currency, billing_address, contact_email, created_at";

pub(crate) const ADDRESS_COLUMNS: &str = "id, user_id, full_name, line1, line2, city, state, \
     postal_code, country, phone, created_at";

fn corrupt(what: &str, err: MarketError) -> MarketError {
    MarketError::Storage(format!("invalid {what} in database: {err}"))
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub image_url: Option<String>,
    pub payout_account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            external_id: row.external_id,
            email: row.email,
            display_name: row.display_name,
            image_url: row.image_url,
            payout_account: row.payout_account,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub currency: String,
    pub condition: String,
    pub category: String,
    pub images: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = MarketError;

    fn try_from(row: ProductRow) -> MarketResult<Self> {
        Ok(Product {
            id: row.id,
            seller_id: row.seller_id,
            title: row.title,
            description: row.description,
            price: Price::from_cents(
                row.price,
                row.currency.parse().map_err(|e| corrupt("currency", e))?,
            ),
            condition: row.condition.parse().map_err(|e| corrupt("condition", e))?,
            category: row.category,
            images: row.images,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct OrderRow {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Uuid,
    pub address_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub payment_intent_id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub shipping_method: String,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = MarketError;

    fn try_from(row: OrderRow) -> MarketResult<Self> {
        Ok(Order {
            id: row.id,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            product_id: row.product_id,
            address_id: row.address_id,
            payment_id: row.payment_id,
            payment_intent_id: row.payment_intent_id,
            status: row.status.parse()?,
            amount: row.amount,
            currency: row.currency.parse().map_err(|e| corrupt("currency", e))?,
            shipping_method: row
                .shipping_method
                .parse()
                .map_err(|e| corrupt("shipping method", e))?,
            tracking_number: row.tracking_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PaymentRow {
    pub id: Uuid,
    pub external_id: String,
    pub buyer_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub billing_address: Option<Json<AddressInput>>,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = MarketError;

    fn try_from(row: PaymentRow) -> MarketResult<Self> {
        Ok(Payment {
            id: row.id,
            external_id: row.external_id,
            buyer_id: row.buyer_id,
            amount: row.amount,
            currency: row.currency.parse().map_err(|e| corrupt("currency", e))?,
            billing_address: row.billing_address.map(|Json(address)| address),
            contact_email: row.contact_email,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AddressRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Address {
            id: row.id,
            user_id: row.user_id,
            details: AddressInput {
                full_name: row.full_name,
                line1: row.line1,
                line2: row.line2,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
                country: row.country,
                phone: row.phone,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct CartRow {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub added_at: DateTime<Utc>,
}

impl From<CartRow> for CartItem {
    fn from(row: CartRow) -> Self {
        CartItem {
            user_id: row.user_id,
            product_id: row.product_id,
            added_at: row.added_at,
        }
    }
}

pub(crate) fn products(rows: Vec<ProductRow>) -> MarketResult<Vec<Product>> {
    rows.into_iter().map(Product::try_from).collect()
}

pub(crate) fn orders(rows: Vec<OrderRow>) -> MarketResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}
