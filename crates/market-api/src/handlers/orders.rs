//! Order endpoints.

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::extract::ValidatedJson;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use market_core::{
    Actor, IntentStatus, MarketError, Order, OrderRole, OrderStatus, OrderTransition, User,
};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    #[serde(default)]
    pub role: OrderRole,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "tracking number must be 1-64 characters"))]
    pub tracking_number: Option<String>,
}

/// Load an order and the caller's role on it
async fn order_for(state: &AppState, user: &User, order_id: Uuid) -> AppResult<(Order, Actor)> {
    let order = state
        .store
        .order(order_id)
        .await?
        .ok_or_else(|| AppError(MarketError::not_found("order", order_id)))?;
    let actor = order
        .actor_for(user.id)
        .ok_or_else(|| AppError::forbidden("not a party to this order"))?;
    Ok((order, actor))
}

/// Cancel the checkout's payment intent at the processor.
///
/// Fails when the buyer has already been charged (or the charge is under
/// way); such an order settles through the webhook instead.
async fn cancel_checkout_payment(state: &AppState, payment_intent_id: &str) -> AppResult<()> {
    let intent = state.processor.retrieve_intent(payment_intent_id).await?;
    let intent = match intent.status {
        IntentStatus::Canceled => return Ok(()),
        IntentStatus::Succeeded | IntentStatus::Processing | IntentStatus::RequiresCapture => {
            return Err(AppError(MarketError::Conflict(format!(
                "payment {payment_intent_id} is {} and can no longer be cancelled",
                intent.status.as_str()
            ))));
        }
        _ => state.processor.cancel_intent(payment_intent_id).await?,
    };
    if intent.status != IntentStatus::Canceled {
        return Err(AppError(MarketError::Conflict(format!(
            "payment {payment_intent_id} is {} after cancellation",
            intent.status.as_str()
        ))));
    }
    Ok(())
}

#[instrument(skip(state, auth))]
pub async fn list_orders(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<OrdersQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let user = state.current_user(&auth).await?;
    let orders = state.store.orders_for_user(user.id, query.role).await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    let user = state.current_user(&auth).await?;
    let (order, _) = order_for(&state, &user, order_id).await?;
    Ok(Json(order))
}

#[instrument(skip(state, auth, request), fields(to = %request.status))]
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateStatusRequest>,
) -> AppResult<Json<Order>> {
    let user = state.current_user(&auth).await?;
    let (order, actor) = order_for(&state, &user, order_id).await?;

    let next = order.status.transition(request.status, actor)?;
    let tracking_number = request.tracking_number.filter(|_| next == OrderStatus::Shipped);

    // The processor must let go of the charge before anything is re-listed
    if next == OrderStatus::Cancelled {
        cancel_checkout_payment(&state, &order.payment_intent_id).await?;
    }

    let updated = state
        .store
        .transition_order(
            order_id,
            OrderTransition {
                from: order.status,
                to: next,
                tracking_number,
            },
        )
        .await?;
    info!(%order_id, from = %order.status, to = %next, ?actor, "Order status changed");

    // A cancelled order abandons its whole checkout
    if next == OrderStatus::Cancelled {
        let released = state
            .store
            .release_reservation(&order.payment_intent_id)
            .await?;
        if !released.is_empty() {
            info!(count = released.len(), "Released sibling reservations");
        }
        let mut ids: Vec<Uuid> = released.iter().map(|o| o.product_id).collect();
        ids.push(order.product_id);
        state.sync_search(&ids).await;
    }

    Ok(Json(updated))
}
