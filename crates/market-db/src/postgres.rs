//! # PostgreSQL Store
//!
//! `MarketStore` over a sqlx pool. Multi-row operations run in one
//! transaction; status changes are conditional updates checked by their
//! affected-row count.

use crate::rows::{
    self, AddressRow, CartRow, OrderRow, PaymentRow, ProductRow, UserRow, ADDRESS_COLUMNS,
    ORDER_COLUMNS, PAYMENT_COLUMNS, PRODUCT_COLUMNS, USER_COLUMNS,
};
use async_trait::async_trait;
use market_core::{
    Address, AddressInput, CartItem, FinalizeOutcome, FinalizedCheckout, MarketError,
    MarketResult, MarketStore, NewPayment, NewProduct, Order, OrderRole, OrderStatus,
    OrderTransition, Payment, Product, ProductFilter, ProductStatus, Reservation,
    SettleOutcome, Settlement, User, UserSync,
};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Embedded migrations under `crates/market-db/migrations`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const PAYMENTS_EXTERNAL_ID_KEY: &str = "payments_external_id_key";
const ORDERS_ONE_ACTIVE_PER_PRODUCT: &str = "orders_one_active_per_product";

fn db_err(err: sqlx::Error) -> MarketError {
    MarketError::Storage(err.to_string())
}

/// Name of the violated unique constraint, if this is a unique violation
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Escape `%`, `_` and `\` for use inside an `ILIKE` pattern
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> MarketResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| MarketError::Storage(format!("migration failed: {e}")))?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn product_exists(&self, id: Uuid) -> MarketResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn order_exists(&self, id: Uuid) -> MarketResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

// =============================================================================
// Connection-level helpers shared by the transactional operations
// =============================================================================

/// Conditional product status change. Returns false if the product was not in `from`.
async fn set_product_status(
    conn: &mut PgConnection,
    id: Uuid,
    from: ProductStatus,
    to: ProductStatus,
) -> MarketResult<bool> {
    from.ensure_transition(to)?;
    let result = sqlx::query(
        "UPDATE products SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(result.rows_affected() == 1)
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> MarketResult<Order> {
    let sql = format!(
        "INSERT INTO orders ({ORDER_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         RETURNING {ORDER_COLUMNS}"
    );
    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(order.id)
        .bind(order.buyer_id)
        .bind(order.seller_id)
        .bind(order.product_id)
        .bind(order.address_id)
        .bind(order.payment_id)
        .bind(&order.payment_intent_id)
        .bind(order.status.as_str())
        .bind(order.amount)
        .bind(order.currency.as_str())
        .bind(order.shipping_method.as_str())
        .bind(&order.tracking_number)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(conn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(c) if c == ORDERS_ONE_ACTIVE_PER_PRODUCT => MarketError::Conflict(format!(
                "product {} already has an active order",
                order.product_id
            )),
            _ => db_err(e),
        })?;
    row.try_into()
}

async fn insert_payment(conn: &mut PgConnection, payment: NewPayment) -> MarketResult<Payment> {
    let payment = payment.into_payment();
    let sql = format!(
        "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {PAYMENT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(payment.id)
        .bind(&payment.external_id)
        .bind(payment.buyer_id)
        .bind(payment.amount)
        .bind(payment.currency.as_str())
        .bind(payment.billing_address.clone().map(Json))
        .bind(&payment.contact_email)
        .bind(payment.created_at)
        .fetch_one(conn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(c) if c == PAYMENTS_EXTERNAL_ID_KEY => MarketError::DuplicatePayment {
                external_id: payment.external_id.clone(),
            },
            _ => db_err(e),
        })?;
    row.try_into()
}

async fn payment_by_external_id(
    conn: &mut PgConnection,
    external_id: &str,
) -> MarketResult<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_id = $1");
    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(external_id)
        .fetch_optional(conn)
        .await
        .map_err(db_err)?
        .map(Payment::try_from)
        .transpose()
}

async fn insert_address(
    conn: &mut PgConnection,
    user_id: Uuid,
    details: &AddressInput,
) -> MarketResult<Address> {
    let address = Address::snapshot(user_id, details.clone());
    let sql = format!(
        "INSERT INTO addresses ({ADDRESS_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {ADDRESS_COLUMNS}"
    );
    let row = sqlx::query_as::<_, AddressRow>(&sql)
        .bind(address.id)
        .bind(address.user_id)
        .bind(&address.details.full_name)
        .bind(&address.details.line1)
        .bind(&address.details.line2)
        .bind(&address.details.city)
        .bind(&address.details.state)
        .bind(&address.details.postal_code)
        .bind(&address.details.country)
        .bind(&address.details.phone)
        .bind(address.created_at)
        .fetch_one(conn)
        .await
        .map_err(db_err)?;
    Ok(row.into())
}

async fn clear_cart(
    conn: &mut PgConnection,
    user_id: Uuid,
    product_ids: &[Uuid],
) -> MarketResult<u64> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = ANY($2)")
        .bind(user_id)
        .bind(product_ids)
        .execute(conn)
        .await
        .map_err(db_err)?;
    Ok(result.rows_affected())
}

async fn active_orders_for_intent(
    conn: &mut PgConnection,
    payment_intent_id: &str,
    buyer_id: Uuid,
) -> MarketResult<Vec<Order>> {
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE payment_intent_id = $1 AND buyer_id = $2 AND status <> 'CANCELLED' \
         ORDER BY created_at, id"
    );
    let rows = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(payment_intent_id)
        .bind(buyer_id)
        .fetch_all(conn)
        .await
        .map_err(db_err)?;
    rows::orders(rows)
}

#[async_trait]
impl MarketStore for PgStore {
    // -- users --------------------------------------------------------------

    #[instrument(skip(self, sync), fields(external_id = %sync.external_id))]
    async fn upsert_user(&self, sync: UserSync) -> MarketResult<User> {
        let sql = format!(
            "INSERT INTO users (id, external_id, email, display_name, image_url) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (external_id) DO UPDATE SET \
                email = EXCLUDED.email, \
                display_name = EXCLUDED.display_name, \
                image_url = EXCLUDED.image_url, \
                updated_at = now() \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&sync.external_id)
            .bind(&sync.email)
            .bind(&sync.display_name)
            .bind(&sync.image_url)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, external_id: &str) -> MarketResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let Some(id) = id else {
            return Ok(false);
        };

        let active = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM orders \
             WHERE (buyer_id = $1 OR seller_id = $1) AND status <> 'CANCELLED')",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if active {
            return Err(MarketError::Conflict(format!(
                "user {external_id} has active orders"
            )));
        }

        sqlx::query("DELETE FROM orders WHERE buyer_id = $1 OR seller_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn user_by_external_id(&self, external_id: &str) -> MarketResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> MarketResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    #[instrument(skip(self))]
    async fn set_payout_account(&self, user_id: Uuid, account: &str) -> MarketResult<User> {
        let sql = format!(
            "UPDATE users SET payout_account = $2, updated_at = now() WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(account)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(User::from)
            .ok_or_else(|| MarketError::not_found("user", user_id))
    }

    // -- products -----------------------------------------------------------

    #[instrument(skip(self, product), fields(title = %product.title))]
    async fn create_product(&self, seller_id: Uuid, product: NewProduct) -> MarketResult<Product> {
        let sql = format!(
            "INSERT INTO products \
                (id, seller_id, title, description, price, currency, condition, category, images, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'AVAILABLE') \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(seller_id)
            .bind(&product.title)
            .bind(&product.description)
            .bind(product.price)
            .bind(product.currency.as_str())
            .bind(product.condition.as_str())
            .bind(&product.category)
            .bind(&product.images)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    MarketError::not_found("user", seller_id)
                } else {
                    db_err(e)
                }
            })?;
        row.try_into()
    }

    async fn product(&self, id: Uuid) -> MarketResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Product::try_from)
            .transpose()
    }

    async fn products_by_ids(&self, ids: &[Uuid]) -> MarketResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut found = rows::products(rows)?;
        found.sort_by_key(|p| ids.iter().position(|id| *id == p.id));
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn list_products(&self, filter: &ProductFilter) -> MarketResult<Vec<Product>> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE status = 'AVAILABLE'"
        ));

        if let Some(text) = filter.text() {
            let pattern = like_pattern(text);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(ref category) = filter.category {
            qb.push(" AND lower(category) = lower(")
                .push_bind(category.clone())
                .push(")");
        }
        if let Some(condition) = filter.condition {
            qb.push(" AND condition = ").push_bind(condition.as_str());
        }
        if let Some(min) = filter.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        if let Some(seller_id) = filter.seller_id {
            qb.push(" AND seller_id = ").push_bind(seller_id);
        }

        qb.push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(i64::from(filter.limit()))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset()));

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        debug!("Listed {} products", rows.len());
        rows::products(rows)
    }

    #[instrument(skip(self))]
    async fn transition_product(
        &self,
        id: Uuid,
        from: ProductStatus,
        to: ProductStatus,
    ) -> MarketResult<Product> {
        from.ensure_transition(to)?;
        let sql = format!(
            "UPDATE products SET status = $3, updated_at = now() \
             WHERE id = $1 AND status = $2 RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            return if self.product_exists(id).await? {
                Err(MarketError::Conflict(format!(
                    "product {id} is no longer {from}"
                )))
            } else {
                Err(MarketError::not_found("product", id))
            };
        };
        row.try_into()
    }

    // -- cart ---------------------------------------------------------------

    async fn cart_items(&self, user_id: Uuid) -> MarketResult<Vec<CartItem>> {
        let rows = sqlx::query_as::<_, CartRow>(
            "SELECT user_id, product_id, added_at FROM cart_items \
             WHERE user_id = $1 ORDER BY added_at, product_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(CartItem::from).collect())
    }

    #[instrument(skip(self))]
    async fn add_cart_item(&self, user_id: Uuid, product_id: Uuid) -> MarketResult<CartItem> {
        let row = sqlx::query_as::<_, CartRow>(
            "INSERT INTO cart_items (user_id, product_id) VALUES ($1, $2) \
             RETURNING user_id, product_id, added_at",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e).is_some() {
                MarketError::Conflict("already in cart".to_string())
            } else if is_foreign_key_violation(&e) {
                MarketError::not_found("product", product_id)
            } else {
                db_err(e)
            }
        })?;
        Ok(row.into())
    }

    async fn remove_cart_item(&self, user_id: Uuid, product_id: Uuid) -> MarketResult<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id)
            .bind(product_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // -- checkout -----------------------------------------------------------

    #[instrument(skip(self, reservation), fields(intent = %reservation.payment_intent_id))]
    async fn reserve_for_intent(&self, reservation: Reservation) -> MarketResult<Vec<Order>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut orders = Vec::with_capacity(reservation.lines.len());

        for order in reservation.pending_orders() {
            let reserved = sqlx::query(
                "UPDATE products SET status = 'RESERVED', updated_at = now() \
                 WHERE id = $1 AND status = 'AVAILABLE' AND seller_id <> $2",
            )
            .bind(order.product_id)
            .bind(reservation.buyer_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            if reserved != 1 {
                return Err(MarketError::Conflict(format!(
                    "product {} is no longer available",
                    order.product_id
                )));
            }
            orders.push(insert_order(&mut tx, &order).await?);
        }

        tx.commit().await.map_err(db_err)?;
        info!("Reserved {} products", orders.len());
        Ok(orders)
    }

    #[instrument(skip(self))]
    async fn release_reservation(&self, payment_intent_id: &str) -> MarketResult<Vec<Order>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = format!(
            "UPDATE orders SET status = 'CANCELLED', updated_at = now() \
             WHERE payment_intent_id = $1 AND status = 'PENDING' RETURNING {ORDER_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(payment_intent_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        let released = rows::orders(rows)?;

        for order in &released {
            if !set_product_status(
                &mut tx,
                order.product_id,
                ProductStatus::Reserved,
                ProductStatus::Available,
            )
            .await?
            {
                warn!(product_id = %order.product_id, "Released order's product was not reserved");
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(released)
    }

    #[instrument(skip(self, settlement), fields(intent = %settlement.payment.external_id))]
    async fn settle_payment(&self, settlement: Settlement) -> MarketResult<SettleOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let intent_id = settlement.payment.external_id.clone();
        let buyer_id = settlement.payment.buyer_id;

        if payment_by_external_id(&mut tx, &intent_id).await?.is_some() {
            return Ok(SettleOutcome::AlreadyProcessed);
        }

        let payment = match insert_payment(&mut tx, settlement.payment).await {
            Ok(payment) => payment,
            Err(MarketError::DuplicatePayment { .. }) => return Ok(SettleOutcome::AlreadyProcessed),
            Err(e) => return Err(e),
        };

        let sql = format!(
            "UPDATE orders SET status = 'PAID', payment_id = $1, updated_at = now() \
             WHERE payment_intent_id = $2 AND buyer_id = $3 AND product_id = ANY($4) \
               AND status = 'PENDING' \
             RETURNING {ORDER_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(payment.id)
            .bind(&intent_id)
            .bind(buyer_id)
            .bind(&settlement.product_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        let paid = rows::orders(rows)?;

        if paid.is_empty() {
            return Err(MarketError::NoPendingOrders {
                payment_intent_id: intent_id,
            });
        }

        for order in &paid {
            if !set_product_status(
                &mut tx,
                order.product_id,
                ProductStatus::Reserved,
                ProductStatus::Sold,
            )
            .await?
            {
                return Err(MarketError::Conflict(format!(
                    "product {} is not reserved",
                    order.product_id
                )));
            }
        }

        let sold: Vec<Uuid> = paid.iter().map(|o| o.product_id).collect();
        clear_cart(&mut tx, buyer_id, &sold).await?;

        tx.commit().await.map_err(db_err)?;
        info!("Settled {} orders", paid.len());
        Ok(SettleOutcome::Settled(paid))
    }

    #[instrument(skip(self, checkout), fields(intent = %checkout.payment.external_id))]
    async fn finalize_checkout(
        &self,
        checkout: FinalizedCheckout,
    ) -> MarketResult<FinalizeOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let intent_id = checkout.payment_intent_id().to_string();
        let buyer_id = checkout.buyer_id();

        if payment_by_external_id(&mut tx, &intent_id).await?.is_some() {
            // Already settled by the webhook or an earlier call: only fill in
            // shipping snapshots the webhook could not know about.
            let mut orders = active_orders_for_intent(&mut tx, &intent_id, buyer_id).await?;
            for order in orders.iter_mut().filter(|o| o.address_id.is_none()) {
                let address = insert_address(&mut tx, buyer_id, &checkout.shipping_address).await?;
                sqlx::query("UPDATE orders SET address_id = $2, updated_at = now() WHERE id = $1")
                    .bind(order.id)
                    .bind(address.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                order.address_id = Some(address.id);
            }
            tx.commit().await.map_err(db_err)?;
            return Ok(FinalizeOutcome {
                orders,
                created: false,
            });
        }

        let payment = insert_payment(&mut tx, checkout.payment.clone()).await?;
        let mut orders = Vec::with_capacity(checkout.lines.len());

        let upgrade_sql = format!(
            "UPDATE orders SET status = 'PAID', payment_id = $1, address_id = $2, updated_at = now() \
             WHERE payment_intent_id = $3 AND buyer_id = $4 AND product_id = $5 \
               AND status = 'PENDING' \
             RETURNING {ORDER_COLUMNS}"
        );

        for line in &checkout.lines {
            let address = insert_address(&mut tx, buyer_id, &checkout.shipping_address).await?;

            let upgraded = sqlx::query_as::<_, OrderRow>(&upgrade_sql)
                .bind(payment.id)
                .bind(address.id)
                .bind(&intent_id)
                .bind(buyer_id)
                .bind(line.product_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

            let order = match upgraded {
                Some(row) => row.try_into()?,
                None => {
                    insert_order(&mut tx, &checkout.paid_order(line, payment.id, address.id))
                        .await?
                }
            };

            if !set_product_status(
                &mut tx,
                line.product_id,
                ProductStatus::Reserved,
                ProductStatus::Sold,
            )
            .await?
            {
                return Err(MarketError::Conflict(format!(
                    "product {} is no longer reserved for this checkout",
                    line.product_id
                )));
            }
            orders.push(order);
        }

        let sold: Vec<Uuid> = checkout.lines.iter().map(|l| l.product_id).collect();
        clear_cart(&mut tx, buyer_id, &sold).await?;

        tx.commit().await.map_err(db_err)?;
        info!("Finalized {} orders", orders.len());
        Ok(FinalizeOutcome {
            orders,
            created: true,
        })
    }

    async fn payment_by_external_id(&self, external_id: &str) -> MarketResult<Option<Payment>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        payment_by_external_id(&mut conn, external_id).await
    }

    // -- orders -------------------------------------------------------------

    async fn order(&self, id: Uuid) -> MarketResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Order::try_from)
            .transpose()
    }

    async fn orders_for_user(&self, user_id: Uuid, role: OrderRole) -> MarketResult<Vec<Order>> {
        let column = match role {
            OrderRole::Buyer => "buyer_id",
            OrderRole::Seller => "seller_id",
        };
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = $1 ORDER BY created_at DESC, id"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows::orders(rows)
    }

    async fn orders_for_payment_intent(&self, payment_intent_id: &str) -> MarketResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_intent_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(payment_intent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows::orders(rows)
    }

    async fn addresses_for_user(&self, user_id: Uuid) -> MarketResult<Vec<Address>> {
        let sql = format!(
            "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, AddressRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    #[instrument(skip(self, change), fields(from = %change.from, to = %change.to))]
    async fn transition_order(&self, id: Uuid, change: OrderTransition) -> MarketResult<Order> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = format!(
            "UPDATE orders SET status = $3, \
                tracking_number = COALESCE($4, tracking_number), \
                updated_at = now() \
             WHERE id = $1 AND status = $2 RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .bind(&change.tracking_number)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let order: Order = match row {
            Some(row) => row.try_into()?,
            None => {
                drop(tx);
                return if self.order_exists(id).await? {
                    Err(MarketError::Conflict(format!(
                        "order {id} is no longer {}",
                        change.from
                    )))
                } else {
                    Err(MarketError::not_found("order", id))
                };
            }
        };

        if change.to == OrderStatus::Cancelled
            && !set_product_status(
                &mut tx,
                order.product_id,
                ProductStatus::Reserved,
                ProductStatus::Available,
            )
            .await?
        {
            warn!(product_id = %order.product_id, "Cancelled order's product was not reserved");
        }

        tx.commit().await.map_err(db_err)?;
        Ok(order)
    }
}
