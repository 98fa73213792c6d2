use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "marketplace",
        "version": env!("CARGO_PKG_VERSION"),
        "processor": state.processor.provider_name(),
        "search": state.search.name(),
    }))
}
