// API module - webhook listener, card listing and the liveness probe

pub mod cards;
pub mod health;
pub mod webhook;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::sync::{AccessController, Trigger};

/// Shared state of the webhook listener
#[derive(Clone)]
pub struct AppState {
    pub cards: Arc<dyn AccessController>,
    pub trigger: Trigger,
}

/// Routes served on the webhook address.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(cards::router())
        .merge(webhook::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `app` until `shutdown` resolves, then drains open requests.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
