use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET liveness probe. Always answers, with or without a session or a reachable backend.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}
