//! # Stripe Connect Transfers
//!
//! After settlement each seller with a connected account receives their
//! share of the charge, minus the platform fee, through `POST /v1/transfers`.

use market_core::TransferRequest;
use serde::Deserialize;

/// Basis points are hundredths of a percent
pub const MAX_FEE_BPS: u32 = 10_000;

/// Seller share of `amount` after a platform fee of `fee_bps` basis points.
/// The fee rounds down; the payout is never negative.
pub fn seller_payout(amount: i64, fee_bps: u32) -> i64 {
    let fee_bps = i64::from(fee_bps.min(MAX_FEE_BPS));
    let fee = amount * fee_bps / i64::from(MAX_FEE_BPS);
    (amount - fee).max(0)
}

pub(crate) fn transfer_params(transfer: &TransferRequest) -> Vec<(String, String)> {
    vec![
        ("amount".to_string(), transfer.amount.to_string()),
        ("currency".to_string(), transfer.currency.as_str().to_string()),
        ("destination".to_string(), transfer.destination_account.clone()),
        ("transfer_group".to_string(), transfer.transfer_group.clone()),
        (
            "metadata[payment_intent]".to_string(),
            transfer.source_payment_intent.clone(),
        ),
    ]
}

/// Idempotency key for one seller's transfer of one payment
pub(crate) fn transfer_idempotency_key(transfer: &TransferRequest) -> String {
    format!(
        "transfer-{}-{}",
        transfer.source_payment_intent, transfer.destination_account
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct StripeTransfer {
    pub id: String,
}
