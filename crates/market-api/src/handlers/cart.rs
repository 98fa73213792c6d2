//! Cart endpoints.

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use market_core::{CartItem, CheckoutCosts, MarketError, Product, ShippingMethod};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItem {
    pub product_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub added_at: DateTime<Utc>,
    /// Absent when the listing has since been deleted
    pub product: Option<Product>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub items: Vec<CartLine>,
    /// Totals over the items that can still be bought, with standard shipping
    pub costs: Option<CheckoutCosts>,
}

#[instrument(skip(state, auth))]
pub async fn get_cart(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<CartView>> {
    let user = state.current_user(&auth).await?;
    let items = state.store.cart_items(user.id).await?;
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products = state.store.products_by_ids(&ids).await?;

    let purchasable: Vec<Product> = products
        .iter()
        .filter(|p| p.is_available())
        .cloned()
        .collect();
    let costs = CheckoutCosts::for_products(&purchasable, ShippingMethod::Standard).ok();

    let items = items
        .into_iter()
        .map(|item| CartLine {
            product_id: item.product_id,
            added_at: item.added_at,
            product: products.iter().find(|p| p.id == item.product_id).cloned(),
        })
        .collect();

    Ok(Json(CartView { items, costs }))
}

#[instrument(skip(state, auth, request))]
pub async fn add_item(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(request): ValidatedJson<AddCartItem>,
) -> AppResult<(StatusCode, Json<CartItem>)> {
    let user = state.current_user(&auth).await?;
    let product = state
        .store
        .product(request.product_id)
        .await?
        .ok_or_else(|| AppError(MarketError::not_found("product", request.product_id)))?;

    if product.seller_id == user.id {
        return Err(AppError(MarketError::Conflict(
            "cannot add your own listing to the cart".to_string(),
        )));
    }
    if !product.is_available() {
        return Err(AppError(MarketError::Conflict(
            "product is no longer available".to_string(),
        )));
    }

    let item = state.store.add_cart_item(user.id, product.id).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[instrument(skip(state, auth))]
pub async fn remove_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let user = state.current_user(&auth).await?;
    if state.store.remove_cart_item(user.id, product_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError(MarketError::not_found("cart item", product_id)))
    }
}
