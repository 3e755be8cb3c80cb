use axum::{extract::State, http::StatusCode, http::Uri, Router};

use crate::api::AppState;

/// Any request under `/webhook` asks the controller to resync.
///
/// Keycloak retries failed deliveries, so a trigger that is already
/// pending still gets a 200.
async fn notify(State(state): State<AppState>, uri: Uri) -> StatusCode {
    if !uri.path().starts_with("/webhook") {
        return StatusCode::NOT_FOUND;
    }

    let posted = state.trigger.post();
    tracing::debug!(path = %uri.path(), posted, "Received webhook");
    StatusCode::OK
}

pub fn router() -> Router<AppState> {
    Router::new().fallback(notify)
}
