use market_core::{
    AddressInput, CheckoutLine, Currency, FinalizedCheckout, MarketError, MarketStore,
    NewPayment, NewProduct, OrderRole, OrderStatus, OrderTransition, Product, ProductCondition,
    ProductFilter, ProductStatus, Reservation, SettleOutcome, Settlement, ShippingMethod, User,
    UserSync,
};
use market_db::MemoryStore;
use uuid::Uuid;

async fn user(store: &MemoryStore, external_id: &str) -> User {
    store
        .upsert_user(UserSync {
            external_id: external_id.to_string(),
            email: format!("{external_id}@example.com"),
            display_name: None,
            image_url: None,
        })
        .await
        .unwrap()
}

async fn listing(store: &MemoryStore, seller: &User, price: i64) -> Product {
    store
        .create_product(
            seller.id,
            NewProduct {
                title: "Film camera".into(),
                description: "Works fine".into(),
                price,
                currency: Currency::USD,
                condition: ProductCondition::Good,
                category: "cameras".into(),
                images: vec![],
            },
        )
        .await
        .unwrap()
}

fn address() -> AddressInput {
    AddressInput {
        full_name: "Ada Buyer".into(),
        line1: "1 Main St".into(),
        line2: None,
        city: "Springfield".into(),
        state: Some("IL".into()),
        postal_code: "62701".into(),
        country: "US".into(),
        phone: None,
    }
}

fn lines(products: &[&Product]) -> Vec<CheckoutLine> {
    products
        .iter()
        .map(|p| CheckoutLine {
            product_id: p.id,
            seller_id: p.seller_id,
            amount: p.price.amount,
        })
        .collect()
}

fn reservation(buyer: &User, intent: &str, products: &[&Product]) -> Reservation {
    Reservation {
        buyer_id: buyer.id,
        payment_intent_id: intent.to_string(),
        currency: Currency::USD,
        shipping_method: ShippingMethod::Standard,
        lines: lines(products),
    }
}

fn payment(buyer: &User, intent: &str, amount: i64) -> NewPayment {
    NewPayment {
        external_id: intent.to_string(),
        buyer_id: buyer.id,
        amount,
        currency: Currency::USD,
        billing_address: None,
        contact_email: None,
    }
}

fn finalized(buyer: &User, intent: &str, products: &[&Product]) -> FinalizedCheckout {
    let lines = lines(products);
    let total = lines.iter().map(|l| l.amount).sum();
    FinalizedCheckout {
        payment: payment(buyer, intent, total),
        shipping_address: address(),
        shipping_method: ShippingMethod::Standard,
        lines,
    }
}

async fn status(store: &MemoryStore, product: &Product) -> ProductStatus {
    store.product(product.id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_upsert_user_updates_existing_row() {
    let store = MemoryStore::new();
    let first = user(&store, "user_1").await;
    let again = store
        .upsert_user(UserSync {
            external_id: "user_1".into(),
            email: "new@example.com".into(),
            display_name: Some("Ada".into()),
            image_url: None,
        })
        .await
        .unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(again.email, "new@example.com");
}

#[tokio::test]
async fn test_settle_payment_is_idempotent() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let product = listing(&store, &seller, 5000).await;
    store.add_cart_item(buyer.id, product.id).await.unwrap();
    store
        .reserve_for_intent(reservation(&buyer, "pi_1", &[&product]))
        .await
        .unwrap();

    let settlement = Settlement {
        payment: payment(&buyer, "pi_1", 5000),
        product_ids: vec![product.id],
    };
    let first = store.settle_payment(settlement.clone()).await.unwrap();
    match first {
        SettleOutcome::Settled(orders) => {
            assert_eq!(orders.len(), 1);
            assert_eq!(orders[0].status, OrderStatus::Paid);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(status(&store, &product).await, ProductStatus::Sold);
    assert!(store.cart_items(buyer.id).await.unwrap().is_empty());

    let second = store.settle_payment(settlement).await.unwrap();
    assert_eq!(second, SettleOutcome::AlreadyProcessed);
}

#[tokio::test]
async fn test_settle_without_pending_orders_records_nothing() {
    let store = MemoryStore::new();
    let buyer = user(&store, "buyer").await;

    let err = store
        .settle_payment(Settlement {
            payment: payment(&buyer, "pi_orphan", 1000),
            product_ids: vec![Uuid::new_v4()],
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MarketError::NoPendingOrders { .. }));
    assert!(store
        .payment_by_external_id("pi_orphan")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_second_reservation_of_same_product_conflicts() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let first = user(&store, "buyer_a").await;
    let second = user(&store, "buyer_b").await;
    let product = listing(&store, &seller, 2500).await;

    store
        .reserve_for_intent(reservation(&first, "pi_a", &[&product]))
        .await
        .unwrap();
    let err = store
        .reserve_for_intent(reservation(&second, "pi_b", &[&product]))
        .await
        .unwrap_err();

    assert!(matches!(err, MarketError::Conflict(_)));
    assert!(store
        .orders_for_payment_intent("pi_b")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_seller_cannot_reserve_own_listing() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let product = listing(&store, &seller, 2500).await;

    let err = store
        .reserve_for_intent(reservation(&seller, "pi_self", &[&product]))
        .await
        .unwrap_err();

    assert!(matches!(err, MarketError::Conflict(_)));
    assert_eq!(status(&store, &product).await, ProductStatus::Available);
}

#[tokio::test]
async fn test_release_reservation_makes_products_available() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let a = listing(&store, &seller, 1000).await;
    let b = listing(&store, &seller, 2000).await;
    store
        .reserve_for_intent(reservation(&buyer, "pi_r", &[&a, &b]))
        .await
        .unwrap();

    let released = store.release_reservation("pi_r").await.unwrap();

    assert_eq!(released.len(), 2);
    assert!(released.iter().all(|o| o.status == OrderStatus::Cancelled));
    assert_eq!(status(&store, &a).await, ProductStatus::Available);
    assert_eq!(status(&store, &b).await, ProductStatus::Available);
}

#[tokio::test]
async fn test_finalize_rolls_back_when_a_product_is_not_reserved() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let reserved = listing(&store, &seller, 1000).await;
    let unreserved = listing(&store, &seller, 2000).await;
    store
        .reserve_for_intent(reservation(&buyer, "pi_f", &[&reserved]))
        .await
        .unwrap();

    let err = store
        .finalize_checkout(finalized(&buyer, "pi_f", &[&reserved, &unreserved]))
        .await
        .unwrap_err();

    assert!(matches!(err, MarketError::Conflict(_)));
    assert!(store.payment_by_external_id("pi_f").await.unwrap().is_none());
    assert_eq!(status(&store, &reserved).await, ProductStatus::Reserved);
    assert!(store
        .addresses_for_user(buyer.id)
        .await
        .unwrap()
        .is_empty());
    let orders = store.orders_for_payment_intent("pi_f").await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_finalize_twice_returns_same_orders() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let product = listing(&store, &seller, 4200).await;
    store
        .reserve_for_intent(reservation(&buyer, "pi_twice", &[&product]))
        .await
        .unwrap();

    let first = store
        .finalize_checkout(finalized(&buyer, "pi_twice", &[&product]))
        .await
        .unwrap();
    let second = store
        .finalize_checkout(finalized(&buyer, "pi_twice", &[&product]))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.orders.len(), 1);
    assert_eq!(second.orders.len(), 1);
    assert_eq!(first.orders[0].id, second.orders[0].id);
    assert_eq!(second.orders[0].status, OrderStatus::Paid);
    assert_eq!(store.addresses_for_user(buyer.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_finalize_after_webhook_attaches_address() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let product = listing(&store, &seller, 3000).await;
    store
        .reserve_for_intent(reservation(&buyer, "pi_w", &[&product]))
        .await
        .unwrap();
    store
        .settle_payment(Settlement {
            payment: payment(&buyer, "pi_w", 3000),
            product_ids: vec![product.id],
        })
        .await
        .unwrap();

    let outcome = store
        .finalize_checkout(finalized(&buyer, "pi_w", &[&product]))
        .await
        .unwrap();

    assert!(!outcome.created);
    assert_eq!(outcome.orders.len(), 1);
    assert!(outcome.orders[0].address_id.is_some());
}

#[tokio::test]
async fn test_order_lifecycle_and_cancellation() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let shipped = listing(&store, &seller, 1500).await;
    let cancelled = listing(&store, &seller, 1500).await;

    let orders = store
        .reserve_for_intent(reservation(&buyer, "pi_l", &[&shipped]))
        .await
        .unwrap();
    store
        .finalize_checkout(finalized(&buyer, "pi_l", &[&shipped]))
        .await
        .unwrap();

    let order = store
        .transition_order(
            orders[0].id,
            OrderTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Shipped,
                tracking_number: Some("1Z999".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.tracking_number.as_deref(), Some("1Z999"));

    let stale = store
        .transition_order(
            orders[0].id,
            OrderTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Shipped,
                tracking_number: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(stale, MarketError::Conflict(_)));

    let pending = store
        .reserve_for_intent(reservation(&buyer, "pi_c", &[&cancelled]))
        .await
        .unwrap();
    store
        .transition_order(
            pending[0].id,
            OrderTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Cancelled,
                tracking_number: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(status(&store, &cancelled).await, ProductStatus::Available);

    let bought = store
        .orders_for_user(buyer.id, OrderRole::Buyer)
        .await
        .unwrap();
    assert_eq!(bought.len(), 2);
    let sold = store
        .orders_for_user(seller.id, OrderRole::Seller)
        .await
        .unwrap();
    assert_eq!(sold.len(), 2);
}

#[tokio::test]
async fn test_cart_rejects_duplicates() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let product = listing(&store, &seller, 800).await;

    store.add_cart_item(buyer.id, product.id).await.unwrap();
    let err = store.add_cart_item(buyer.id, product.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(ref m) if m == "already in cart"));

    assert!(store.remove_cart_item(buyer.id, product.id).await.unwrap());
    assert!(!store.remove_cart_item(buyer.id, product.id).await.unwrap());
}

#[tokio::test]
async fn test_list_products_hides_unavailable_listings() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let visible = listing(&store, &seller, 1000).await;
    let reserved = listing(&store, &seller, 1000).await;
    store
        .reserve_for_intent(reservation(&buyer, "pi_hide", &[&reserved]))
        .await
        .unwrap();

    let listed = store
        .list_products(&ProductFilter::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, visible.id);
}

#[tokio::test]
async fn test_delete_user_with_active_orders_conflicts() {
    let store = MemoryStore::new();
    let seller = user(&store, "seller").await;
    let buyer = user(&store, "buyer").await;
    let product = listing(&store, &seller, 1000).await;
    store
        .reserve_for_intent(reservation(&buyer, "pi_d", &[&product]))
        .await
        .unwrap();

    let err = store.delete_user("buyer").await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    store.release_reservation("pi_d").await.unwrap();
    assert!(store.delete_user("buyer").await.unwrap());
    assert!(store.user_by_external_id("buyer").await.unwrap().is_none());
    assert!(!store.delete_user("buyer").await.unwrap());
}
