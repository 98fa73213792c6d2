//! # Checkout
//!
//! ```text
//!   POST /api/checkout/payment-intent
//!     cart ──▶ costs ──▶ processor.create_intent ──▶ store.reserve_for_intent
//!                                                     (AVAILABLE → RESERVED,
//!                                                      one PENDING order per item)
//!
//!   buyer confirms the card client-side, then either or both of:
//!
//!   POST /api/webhooks/stripe         POST /api/checkout/finalize-order
//!     store.settle_payment              processor.retrieve_intent
//!                                       store.finalize_checkout
//! ```
//!
//! Both settlement paths insert the same payment row (keyed by the intent ID),
//! so whichever runs second sees it and changes nothing but missing
//! shipping-address snapshots.

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::handlers::payouts::pay_sellers;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use market_core::{
    AddressInput, CheckoutCosts, CheckoutLine, ContactInfo, FinalizeOutcome, FinalizedCheckout,
    IntentMetadata, IntentRequest, MarketError, NewPayment, OrderSummary, Product, Reservation,
    ShippingMethod, User,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    #[serde(default)]
    pub shipping_method: ShippingMethod,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub costs: CheckoutCosts,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOrderRequest {
    #[validate(length(min = 1, message = "paymentIntentId is required"))]
    pub payment_intent_id: String,
    #[validate(nested)]
    pub shipping_address: AddressInput,
    #[serde(default)]
    #[validate(nested)]
    pub billing_address: Option<AddressInput>,
    pub shipping_method: ShippingMethod,
    #[validate(nested)]
    pub contact_info: ContactInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOrderResponse {
    pub orders: Vec<OrderSummary>,
    /// False when the payment had already been recorded
    pub created: bool,
}

fn checkout_lines(products: &[Product], method: ShippingMethod) -> Vec<CheckoutLine> {
    products
        .iter()
        .map(|p| CheckoutLine {
            product_id: p.id,
            seller_id: p.seller_id,
            amount: CheckoutCosts::line_amount(p, method),
        })
        .collect()
}

/// Cart products the buyer may pay for right now
async fn purchasable_cart(state: &AppState, buyer: &User) -> AppResult<Vec<Product>> {
    let items = state.store.cart_items(buyer.id).await?;
    if items.is_empty() {
        return Err(AppError::bad_request("cart is empty"));
    }
    if items.len() > IntentMetadata::MAX_PRODUCTS {
        return Err(AppError(MarketError::field(
            "cart",
            format!(
                "a checkout holds at most {} items",
                IntentMetadata::MAX_PRODUCTS
            ),
        )));
    }
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products = state.store.products_by_ids(&ids).await?;

    if products.len() != ids.len() {
        return Err(AppError(MarketError::Conflict(
            "some cart items are no longer listed".to_string(),
        )));
    }
    if let Some(own) = products.iter().find(|p| p.seller_id == buyer.id) {
        return Err(AppError(MarketError::Conflict(format!(
            "cannot buy your own listing {}",
            own.id
        ))));
    }
    if let Some(gone) = products.iter().find(|p| !p.is_available()) {
        return Err(AppError(MarketError::Conflict(format!(
            "product {} is no longer available",
            gone.id
        ))));
    }
    Ok(products)
}

#[instrument(skip(state, auth, request))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(request): ValidatedJson<PaymentIntentRequest>,
) -> AppResult<Json<PaymentIntentResponse>> {
    let buyer = state.current_user(&auth).await?;
    let products = purchasable_cart(&state, &buyer).await?;
    let method = request.shipping_method;
    let costs = CheckoutCosts::for_products(&products, method)?;

    let mut seller_ids: Vec<Uuid> = products.iter().map(|p| p.seller_id).collect();
    seller_ids.sort();
    seller_ids.dedup();
    let product_ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();

    let intent_request = IntentRequest {
        amount: costs.total,
        currency: costs.currency,
        metadata: IntentMetadata {
            checkout_id: Uuid::new_v4(),
            buyer_id: buyer.id,
            product_ids: product_ids.clone(),
            seller_ids,
            shipping_method: method,
        },
        customer_email: Some(buyer.email.clone()),
    };
    let intent = state.processor.create_intent(&intent_request).await?;

    let reservation = Reservation {
        buyer_id: buyer.id,
        payment_intent_id: intent.id.clone(),
        currency: costs.currency,
        shipping_method: method,
        lines: checkout_lines(&products, method),
    };
    if let Err(e) = state.store.reserve_for_intent(reservation).await {
        warn!(payment_intent_id = %intent.id, error = %e, "Reservation failed, cancelling intent");
        if let Err(cancel) = state.processor.cancel_intent(&intent.id).await {
            warn!(payment_intent_id = %intent.id, error = %cancel, "Intent cancellation failed");
        }
        return Err(AppError(e));
    }
    state.sync_search(&product_ids).await;

    let client_secret = intent.client_secret.clone().ok_or_else(|| {
        AppError(MarketError::Internal(format!(
            "payment intent {} has no client secret",
            intent.id
        )))
    })?;

    info!(
        payment_intent_id = %intent.id,
        items = products.len(),
        total = %costs.total_price().display(),
        "Checkout reserved"
    );

    Ok(Json(PaymentIntentResponse {
        client_secret,
        payment_intent_id: intent.id,
        costs,
    }))
}

#[instrument(skip(state, auth, request), fields(payment_intent_id = %request.payment_intent_id))]
pub async fn finalize_order(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(request): ValidatedJson<FinalizeOrderRequest>,
) -> AppResult<Json<FinalizeOrderResponse>> {
    let buyer = state.current_user(&auth).await?;

    // Everything below comes from the processor, not from the client
    let intent = state
        .processor
        .retrieve_intent(&request.payment_intent_id)
        .await?;
    let metadata = intent.checkout_metadata()?;

    if metadata.buyer_id != buyer.id {
        return Err(AppError::forbidden("payment belongs to another user"));
    }
    if !intent.is_succeeded() {
        return Err(AppError(MarketError::PaymentNotSucceeded {
            status: intent.status.as_str().to_string(),
        }));
    }
    if metadata.shipping_method != request.shipping_method {
        return Err(AppError(MarketError::field(
            "shippingMethod",
            "does not match the shipping method that was paid for",
        )));
    }

    let products = state.store.products_by_ids(&metadata.product_ids).await?;
    if products.len() != metadata.product_ids.len() {
        return Err(AppError(MarketError::Conflict(
            "some purchased products no longer exist".to_string(),
        )));
    }
    let costs = CheckoutCosts::for_products(&products, request.shipping_method)?;
    if costs.total != intent.amount || costs.currency != intent.currency {
        return Err(AppError::bad_request(
            "payment amount does not match the order total",
        ));
    }

    let checkout = FinalizedCheckout {
        payment: NewPayment {
            external_id: intent.id.clone(),
            buyer_id: buyer.id,
            amount: intent.amount,
            currency: intent.currency,
            billing_address: request.billing_address,
            contact_email: Some(request.contact_info.email),
        },
        shipping_address: request.shipping_address,
        shipping_method: request.shipping_method,
        lines: checkout_lines(&products, request.shipping_method),
    };

    // A webhook that commits between our check and our insert surfaces as a
    // duplicate; the retry then takes the already-paid branch.
    let outcome: FinalizeOutcome = match state.store.finalize_checkout(checkout.clone()).await {
        Err(MarketError::DuplicatePayment { .. }) => {
            state.store.finalize_checkout(checkout).await?
        }
        other => other?,
    };

    if outcome.created {
        info!(orders = outcome.orders.len(), "Checkout finalized");
        state.sync_search(&metadata.product_ids).await;
        pay_sellers(&state, &intent.id, &metadata.transfer_group(), &outcome.orders).await;
    } else {
        info!("Checkout already settled, returning existing orders");
    }

    Ok(Json(FinalizeOrderResponse {
        orders: outcome.orders.iter().map(|o| o.summary()).collect(),
        created: outcome.created,
    }))
}
