use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::state::AppState;

/// GET /health
///
/// 200 while the database answers, 503 otherwise. Redis and mail problems
/// are reported but do not fail the check.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.services.health_check().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "status": if status.is_healthy() { "ok" } else { "degraded" },
            "version": crate::VERSION,
            "services": status,
            "issues": status.get_issues(),
        })),
    )
}
