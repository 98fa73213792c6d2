//! Listing endpoints.

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use market_core::security::validate_and_sanitize_input;
use market_core::{MarketError, NewProduct, Product, ProductFilter, ProductStatus};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Fields a seller may set on a new listing
const PRODUCT_FIELDS: &[&str] = &[
    "title",
    "description",
    "price",
    "currency",
    "condition",
    "category",
    "images",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductList {
    pub products: Vec<Product>,
    pub page: u32,
    pub per_page: u32,
}

/// Put `products` in the order of `ids`, dropping anything no longer listed
fn in_search_order(ids: &[Uuid], products: Vec<Product>) -> Vec<Product> {
    let mut by_id: HashMap<Uuid, Product> = products.into_iter().map(|p| (p.id, p)).collect();
    ids.iter()
        .filter_map(|id| by_id.remove(id))
        .filter(Product::is_available)
        .collect()
}

#[instrument(skip(state, filter))]
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> AppResult<Json<ProductList>> {
    let products = match state.search.search(&filter).await {
        Ok(ids) => in_search_order(&ids, state.store.products_by_ids(&ids).await?),
        Err(e) => {
            warn!(index = state.search.name(), error = %e, "Search failed, falling back to the database");
            state.store.list_products(&filter).await?
        }
    };

    Ok(Json(ProductList {
        products,
        page: filter.page.unwrap_or(0),
        per_page: filter.limit(),
    }))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    state
        .store
        .product(product_id)
        .await?
        .filter(|p| p.status != ProductStatus::Removed)
        .map(Json)
        .ok_or_else(|| AppError(MarketError::not_found("product", product_id)))
}

#[instrument(skip(state, auth, body))]
pub async fn create_product(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<serde_json::Value>,
) -> AppResult<(StatusCode, Json<Product>)> {
    let user = state.current_user(&auth).await?;

    let sanitized = validate_and_sanitize_input(&body, PRODUCT_FIELDS)?;
    let new_product: NewProduct = serde_json::from_value(sanitized)
        .map_err(|e| AppError::bad_request(format!("invalid listing: {e}")))?;
    new_product.validate()?;

    let product = state.store.create_product(user.id, new_product).await?;
    info!(product_id = %product.id, seller_id = %user.id, "Listing created");

    if let Err(e) = state.search.upsert(&product).await {
        warn!(product_id = %product.id, error = %e, "Search index sync failed");
    }

    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state, auth))]
pub async fn remove_product(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let user = state.current_user(&auth).await?;
    let product = state
        .store
        .product(product_id)
        .await?
        .ok_or_else(|| AppError(MarketError::not_found("product", product_id)))?;

    if product.seller_id != user.id {
        return Err(AppError::forbidden("only the seller can remove a listing"));
    }

    state
        .store
        .transition_product(product_id, ProductStatus::Available, ProductStatus::Removed)
        .await?;

    if let Err(e) = state.search.remove(product_id).await {
        warn!(%product_id, error = %e, "Search index sync failed");
    }

    Ok(StatusCode::NO_CONTENT)
}
