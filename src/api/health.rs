use axum::{routing::get, Router};

/// Liveness probe, served on its own address
pub fn router() -> Router {
    Router::new().route("/health", get(|| async { "OK" }))
}
