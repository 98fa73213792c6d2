//! # In-Memory Store
//!
//! `MarketStore` kept in process, for tests and local development without a
//! database. Every operation runs against a copy of the tables that replaces
//! the live set only when the operation succeeds, so a failed checkout leaves
//! nothing behind, just like a rolled-back transaction.

use async_trait::async_trait;
use chrono::Utc;
use market_core::{
    Address, CartItem, FinalizeOutcome, FinalizedCheckout, MarketError, MarketResult,
    MarketStore, NewPayment, NewProduct, Order, OrderRole, OrderStatus, OrderTransition, Payment,
    Price, Product, ProductFilter, ProductStatus, Reservation, SettleOutcome, Settlement, User,
    UserSync,
};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    products: HashMap<Uuid, Product>,
    cart: Vec<CartItem>,
    addresses: Vec<Address>,
    /// Keyed by external ID, which is unique
    payments: HashMap<String, Payment>,
    orders: Vec<Order>,
}

impl Tables {
    fn product_mut(&mut self, id: Uuid) -> MarketResult<&mut Product> {
        self.products
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("product", id))
    }

    /// Conditional status change. Returns false if the product was not in `from`.
    fn set_product_status(
        &mut self,
        id: Uuid,
        from: ProductStatus,
        to: ProductStatus,
    ) -> MarketResult<bool> {
        from.ensure_transition(to)?;
        let product = self.product_mut(id)?;
        if product.status != from {
            return Ok(false);
        }
        product.status = to;
        product.updated_at = Utc::now();
        Ok(true)
    }

    fn insert_order(&mut self, order: Order) -> MarketResult<Order> {
        if order.status.is_active()
            && self
                .orders
                .iter()
                .any(|o| o.product_id == order.product_id && o.status.is_active())
        {
            return Err(MarketError::Conflict(format!(
                "product {} already has an active order",
                order.product_id
            )));
        }
        self.orders.push(order.clone());
        Ok(order)
    }

    fn insert_payment(&mut self, payment: NewPayment) -> MarketResult<Payment> {
        if self.payments.contains_key(&payment.external_id) {
            return Err(MarketError::DuplicatePayment {
                external_id: payment.external_id,
            });
        }
        let payment = payment.into_payment();
        self.payments
            .insert(payment.external_id.clone(), payment.clone());
        Ok(payment)
    }

    fn insert_address(&mut self, address: Address) -> Uuid {
        let id = address.id;
        self.addresses.push(address);
        id
    }

    fn clear_cart(&mut self, user_id: Uuid, product_ids: &[Uuid]) {
        self.cart
            .retain(|c| !(c.user_id == user_id && product_ids.contains(&c.product_id)));
    }

    fn order_mut(&mut self, id: Uuid) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == id)
    }
}

/// Process-local store with transactional semantics
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the live tables
    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> MarketResult<T> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| MarketError::Internal("memory store lock poisoned".to_string()))?;
        Ok(f(&tables))
    }

    /// Run `f` against a copy of the tables; commit the copy only on `Ok`
    fn transact<T>(&self, f: impl FnOnce(&mut Tables) -> MarketResult<T>) -> MarketResult<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| MarketError::Internal("memory store lock poisoned".to_string()))?;
        let mut working = tables.clone();
        let result = f(&mut working)?;
        *tables = working;
        Ok(result)
    }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> chrono::DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[async_trait]
impl MarketStore for MemoryStore {
    // -- users --------------------------------------------------------------

    async fn upsert_user(&self, sync: UserSync) -> MarketResult<User> {
        self.transact(|t| {
            if let Some(user) = t
                .users
                .values_mut()
                .find(|u| u.external_id == sync.external_id)
            {
                user.apply_sync(sync);
                return Ok(user.clone());
            }
            let user = User::from_sync(sync);
            t.users.insert(user.id, user.clone());
            Ok(user)
        })
    }

    async fn delete_user(&self, external_id: &str) -> MarketResult<bool> {
        self.transact(|t| {
            let Some(id) = t
                .users
                .values()
                .find(|u| u.external_id == external_id)
                .map(|u| u.id)
            else {
                return Ok(false);
            };

            let involved = |o: &Order| o.buyer_id == id || o.seller_id == id;
            if t.orders.iter().any(|o| involved(o) && o.status.is_active()) {
                return Err(MarketError::Conflict(format!(
                    "user {external_id} has active orders"
                )));
            }

            t.orders.retain(|o| !involved(o));
            let owned: Vec<Uuid> = t
                .products
                .values()
                .filter(|p| p.seller_id == id)
                .map(|p| p.id)
                .collect();
            t.products.retain(|_, p| p.seller_id != id);
            t.cart
                .retain(|c| c.user_id != id && !owned.contains(&c.product_id));
            t.addresses.retain(|a| a.user_id != id);
            t.payments.retain(|_, p| p.buyer_id != id);
            t.users.remove(&id);
            Ok(true)
        })
    }

    async fn user_by_external_id(&self, external_id: &str) -> MarketResult<Option<User>> {
        self.read(|t| {
            t.users
                .values()
                .find(|u| u.external_id == external_id)
                .cloned()
        })
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> MarketResult<Vec<User>> {
        self.read(|t| ids.iter().filter_map(|id| t.users.get(id).cloned()).collect())
    }

    async fn set_payout_account(&self, user_id: Uuid, account: &str) -> MarketResult<User> {
        self.transact(|t| {
            let user = t
                .users
                .get_mut(&user_id)
                .ok_or_else(|| MarketError::not_found("user", user_id))?;
            user.payout_account = Some(account.to_string());
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
    }

    // -- products -----------------------------------------------------------

    async fn create_product(&self, seller_id: Uuid, product: NewProduct) -> MarketResult<Product> {
        self.transact(|t| {
            if !t.users.contains_key(&seller_id) {
                return Err(MarketError::not_found("user", seller_id));
            }
            let now = Utc::now();
            let product = Product {
                id: Uuid::new_v4(),
                seller_id,
                title: product.title,
                description: product.description,
                price: Price::from_cents(product.price, product.currency),
                condition: product.condition,
                category: product.category,
                images: product.images,
                status: ProductStatus::Available,
                created_at: now,
                updated_at: now,
            };
            t.products.insert(product.id, product.clone());
            Ok(product)
        })
    }

    async fn product(&self, id: Uuid) -> MarketResult<Option<Product>> {
        self.read(|t| t.products.get(&id).cloned())
    }

    async fn products_by_ids(&self, ids: &[Uuid]) -> MarketResult<Vec<Product>> {
        self.read(|t| {
            ids.iter()
                .filter_map(|id| t.products.get(id).cloned())
                .collect()
        })
    }

    async fn list_products(&self, filter: &ProductFilter) -> MarketResult<Vec<Product>> {
        self.read(|t| {
            let mut matching: Vec<Product> = t
                .products
                .values()
                .filter(|p| filter.matches(p))
                .cloned()
                .collect();
            newest_first(&mut matching, |p| p.created_at);
            matching
                .into_iter()
                .skip(filter.offset() as usize)
                .take(filter.limit() as usize)
                .collect()
        })
    }

    async fn transition_product(
        &self,
        id: Uuid,
        from: ProductStatus,
        to: ProductStatus,
    ) -> MarketResult<Product> {
        self.transact(|t| {
            if !t.set_product_status(id, from, to)? {
                return Err(MarketError::Conflict(format!(
                    "product {id} is no longer {from}"
                )));
            }
            Ok(t.product_mut(id)?.clone())
        })
    }

    // -- cart ---------------------------------------------------------------

    async fn cart_items(&self, user_id: Uuid) -> MarketResult<Vec<CartItem>> {
        self.read(|t| {
            t.cart
                .iter()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect()
        })
    }

    async fn add_cart_item(&self, user_id: Uuid, product_id: Uuid) -> MarketResult<CartItem> {
        self.transact(|t| {
            if !t.products.contains_key(&product_id) {
                return Err(MarketError::not_found("product", product_id));
            }
            if t
                .cart
                .iter()
                .any(|c| c.user_id == user_id && c.product_id == product_id)
            {
                return Err(MarketError::Conflict("already in cart".to_string()));
            }
            let item = CartItem {
                user_id,
                product_id,
                added_at: Utc::now(),
            };
            t.cart.push(item.clone());
            Ok(item)
        })
    }

    async fn remove_cart_item(&self, user_id: Uuid, product_id: Uuid) -> MarketResult<bool> {
        self.transact(|t| {
            let before = t.cart.len();
            t.cart
                .retain(|c| !(c.user_id == user_id && c.product_id == product_id));
            Ok(t.cart.len() != before)
        })
    }

    // -- checkout -----------------------------------------------------------

    async fn reserve_for_intent(&self, reservation: Reservation) -> MarketResult<Vec<Order>> {
        self.transact(|t| {
            let mut orders = Vec::with_capacity(reservation.lines.len());
            for order in reservation.pending_orders() {
                let product = t.product_mut(order.product_id)?;
                if product.status != ProductStatus::Available
                    || product.seller_id == reservation.buyer_id
                {
                    return Err(MarketError::Conflict(format!(
                        "product {} is no longer available",
                        order.product_id
                    )));
                }
                t.set_product_status(
                    order.product_id,
                    ProductStatus::Available,
                    ProductStatus::Reserved,
                )?;
                orders.push(t.insert_order(order)?);
            }
            info!("Reserved {} products", orders.len());
            Ok(orders)
        })
    }

    async fn release_reservation(&self, payment_intent_id: &str) -> MarketResult<Vec<Order>> {
        self.transact(|t| {
            let now = Utc::now();
            let mut released = Vec::new();
            for order in t.orders.iter_mut().filter(|o| {
                o.payment_intent_id == payment_intent_id && o.status == OrderStatus::Pending
            }) {
                order.status = OrderStatus::Cancelled;
                order.updated_at = now;
                released.push(order.clone());
            }
            for order in &released {
                if !t.set_product_status(
                    order.product_id,
                    ProductStatus::Reserved,
                    ProductStatus::Available,
                )? {
                    warn!(product_id = %order.product_id, "Released order's product was not reserved");
                }
            }
            Ok(released)
        })
    }

    async fn settle_payment(&self, settlement: Settlement) -> MarketResult<SettleOutcome> {
        let result = self.transact(|t| {
            let intent_id = settlement.payment.external_id.clone();
            let buyer_id = settlement.payment.buyer_id;
            let payment = t.insert_payment(settlement.payment)?;

            let now = Utc::now();
            let mut paid = Vec::new();
            for order in t.orders.iter_mut().filter(|o| {
                o.payment_intent_id == intent_id
                    && o.buyer_id == buyer_id
                    && o.status == OrderStatus::Pending
                    && settlement.product_ids.contains(&o.product_id)
            }) {
                order.status = OrderStatus::Paid;
                order.payment_id = Some(payment.id);
                order.updated_at = now;
                paid.push(order.clone());
            }

            if paid.is_empty() {
                return Err(MarketError::NoPendingOrders {
                    payment_intent_id: intent_id,
                });
            }

            for order in &paid {
                if !t.set_product_status(
                    order.product_id,
                    ProductStatus::Reserved,
                    ProductStatus::Sold,
                )? {
                    return Err(MarketError::Conflict(format!(
                        "product {} is not reserved",
                        order.product_id
                    )));
                }
            }

            let sold: Vec<Uuid> = paid.iter().map(|o| o.product_id).collect();
            t.clear_cart(buyer_id, &sold);
            Ok(SettleOutcome::Settled(paid))
        });

        match result {
            Err(MarketError::DuplicatePayment { .. }) => Ok(SettleOutcome::AlreadyProcessed),
            other => other,
        }
    }

    async fn finalize_checkout(
        &self,
        checkout: FinalizedCheckout,
    ) -> MarketResult<FinalizeOutcome> {
        self.transact(|t| {
            let intent_id = checkout.payment_intent_id().to_string();
            let buyer_id = checkout.buyer_id();

            if t.payments.contains_key(&intent_id) {
                let mut missing = Vec::new();
                for order in t.orders.iter_mut().filter(|o| {
                    o.payment_intent_id == intent_id && o.buyer_id == buyer_id && o.status.is_active()
                }) {
                    if order.address_id.is_none() {
                        let address = Address::snapshot(buyer_id, checkout.shipping_address.clone());
                        order.address_id = Some(address.id);
                        order.updated_at = Utc::now();
                        missing.push(address);
                    }
                }
                for address in missing {
                    t.insert_address(address);
                }
                let orders = t
                    .orders
                    .iter()
                    .filter(|o| {
                        o.payment_intent_id == intent_id
                            && o.buyer_id == buyer_id
                            && o.status.is_active()
                    })
                    .cloned()
                    .collect();
                return Ok(FinalizeOutcome {
                    orders,
                    created: false,
                });
            }

            let payment = t.insert_payment(checkout.payment.clone())?;
            let mut orders = Vec::with_capacity(checkout.lines.len());

            for line in &checkout.lines {
                let address_id =
                    t.insert_address(Address::snapshot(buyer_id, checkout.shipping_address.clone()));

                let pending = t.orders.iter_mut().find(|o| {
                    o.payment_intent_id == intent_id
                        && o.buyer_id == buyer_id
                        && o.product_id == line.product_id
                        && o.status == OrderStatus::Pending
                });
                let order = match pending {
                    Some(order) => {
                        order.status = OrderStatus::Paid;
                        order.payment_id = Some(payment.id);
                        order.address_id = Some(address_id);
                        order.updated_at = Utc::now();
                        order.clone()
                    }
                    None => t.insert_order(checkout.paid_order(line, payment.id, address_id))?,
                };

                if !t.set_product_status(
                    line.product_id,
                    ProductStatus::Reserved,
                    ProductStatus::Sold,
                )? {
                    return Err(MarketError::Conflict(format!(
                        "product {} is no longer reserved for this checkout",
                        line.product_id
                    )));
                }
                orders.push(order);
            }

            let sold: Vec<Uuid> = checkout.lines.iter().map(|l| l.product_id).collect();
            t.clear_cart(buyer_id, &sold);
            Ok(FinalizeOutcome {
                orders,
                created: true,
            })
        })
    }

    async fn payment_by_external_id(&self, external_id: &str) -> MarketResult<Option<Payment>> {
        self.read(|t| t.payments.get(external_id).cloned())
    }

    // -- orders -------------------------------------------------------------

    async fn order(&self, id: Uuid) -> MarketResult<Option<Order>> {
        self.read(|t| t.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid, role: OrderRole) -> MarketResult<Vec<Order>> {
        self.read(|t| {
            let mut orders: Vec<Order> = t
                .orders
                .iter()
                .filter(|o| match role {
                    OrderRole::Buyer => o.buyer_id == user_id,
                    OrderRole::Seller => o.seller_id == user_id,
                })
                .cloned()
                .collect();
            newest_first(&mut orders, |o| o.created_at);
            orders
        })
    }

    async fn orders_for_payment_intent(&self, payment_intent_id: &str) -> MarketResult<Vec<Order>> {
        self.read(|t| {
            t.orders
                .iter()
                .filter(|o| o.payment_intent_id == payment_intent_id)
                .cloned()
                .collect()
        })
    }

    async fn addresses_for_user(&self, user_id: Uuid) -> MarketResult<Vec<Address>> {
        self.read(|t| {
            t.addresses
                .iter()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect()
        })
    }

    async fn transition_order(&self, id: Uuid, change: OrderTransition) -> MarketResult<Order> {
        self.transact(|t| {
            let order = t
                .order_mut(id)
                .ok_or_else(|| MarketError::not_found("order", id))?;
            if order.status != change.from {
                return Err(MarketError::Conflict(format!(
                    "order {id} is no longer {}",
                    change.from
                )));
            }
            order.status = change.to;
            if change.tracking_number.is_some() {
                order.tracking_number = change.tracking_number.clone();
            }
            order.updated_at = Utc::now();
            let order = order.clone();

            if change.to == OrderStatus::Cancelled
                && !t.set_product_status(
                    order.product_id,
                    ProductStatus::Reserved,
                    ProductStatus::Available,
                )?
            {
                warn!(product_id = %order.product_id, "Cancelled order's product was not reserved");
            }
            Ok(order)
        })
    }
}
