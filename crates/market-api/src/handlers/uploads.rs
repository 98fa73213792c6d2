use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::state::AppState;
use crate::uploads::{ApprovedUpload, UploadFile};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub files: Vec<UploadFile>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<ApprovedUpload>,
}

/// Approve a batch of listing images against the upload policy
#[instrument(skip(state, auth, request), fields(files = request.files.len()))]
pub async fn approve_upload(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<UploadRequest>,
) -> AppResult<Json<UploadResponse>> {
    let user = state.current_user(&auth).await?;
    let files = state.uploads.approve(user.id, &request.files)?;
    info!(user_id = %user.id, count = files.len(), "Upload approved");
    Ok(Json(UploadResponse { files }))
}
