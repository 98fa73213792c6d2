use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::extract::ValidatedJson;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use market_core::User;
use serde::Deserialize;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PayoutAccountRequest {
    #[validate(custom(function = "validate_connected_account"))]
    pub account_id: String,
}

fn validate_connected_account(account: &str) -> Result<(), ValidationError> {
    let valid = account
        .strip_prefix("acct_")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("account_id")
            .with_message("must be a connected account ID (acct_...)".into()))
    }
}

pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    Ok(Json(state.current_user(&auth).await?))
}

#[instrument(skip(state, auth, request))]
pub async fn set_payout_account(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(request): ValidatedJson<PayoutAccountRequest>,
) -> AppResult<Json<User>> {
    let user = state.current_user(&auth).await?;
    let user = state
        .store
        .set_payout_account(user.id, &request.account_id)
        .await?;
    info!(user_id = %user.id, "Payout account set");
    Ok(Json(user))
}
