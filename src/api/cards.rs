use axum::{extract::State, routing::get, Json, Router};

use crate::api::AppState;
use crate::error::Result;
use crate::models::Card;

/// Lists the cards currently authorized on the access controller
async fn list_cards(State(state): State<AppState>) -> Result<Json<Vec<Card>>> {
    let cards = state.cards.list_cards().await?;
    Ok(Json(cards))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/cards", get(list_cards))
}
