//! Seller payouts after a checkout settles.
//!
//! Runs on whichever path (webhook or finalize) actually recorded the
//! payment, so each checkout is paid out once. The processor's idempotency
//! key makes a repeated transfer for the same intent and account a no-op.

use crate::state::AppState;
use market_core::{Currency, MarketResult, Order, TransferRequest};
use market_stripe::seller_payout;
use std::collections::BTreeMap;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Per-seller totals of a settled checkout
fn seller_totals(orders: &[Order]) -> BTreeMap<Uuid, (i64, Currency)> {
    let mut totals = BTreeMap::new();
    for order in orders {
        let entry = totals.entry(order.seller_id).or_insert((0, order.currency));
        entry.0 += order.amount;
    }
    totals
}

/// Transfer each seller's share. Failures are logged, never returned.
#[instrument(skip(state, orders), fields(orders = orders.len()))]
pub async fn pay_sellers(
    state: &AppState,
    payment_intent_id: &str,
    transfer_group: &str,
    orders: &[Order],
) {
    if let Err(e) = try_pay_sellers(state, payment_intent_id, transfer_group, orders).await {
        error!(error = %e, payment_intent_id, "Seller payouts failed");
    }
}

async fn try_pay_sellers(
    state: &AppState,
    payment_intent_id: &str,
    transfer_group: &str,
    orders: &[Order],
) -> MarketResult<()> {
    let totals = seller_totals(orders);
    let seller_ids: Vec<Uuid> = totals.keys().copied().collect();
    let sellers = state.store.users_by_ids(&seller_ids).await?;

    for seller in sellers {
        let Some((gross, currency)) = totals.get(&seller.id).copied() else {
            continue;
        };
        let Some(account) = seller.payout_account else {
            info!(seller_id = %seller.id, "Seller has no payout account, payout deferred");
            continue;
        };
        let amount = seller_payout(gross, state.config.platform_fee_bps);
        if amount <= 0 {
            continue;
        }

        let transfer = TransferRequest {
            destination_account: account,
            amount,
            currency,
            transfer_group: transfer_group.to_string(),
            source_payment_intent: payment_intent_id.to_string(),
        };
        match state.processor.create_transfer(&transfer).await {
            Ok(transfer_id) => {
                info!(seller_id = %seller.id, %transfer_id, amount, "Seller payout created")
            }
            Err(e) => error!(seller_id = %seller.id, error = %e, "Seller payout failed"),
        }
    }
    Ok(())
}
