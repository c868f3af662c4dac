use axum::{routing::{get, post}, Router, Extension};
use std::sync::Arc;

use crate::{AppState, health_with_pool};
use crate::controllers;

pub fn router(state: Arc<AppState>) -> Router {
    let community = Router::new()
        .route("/groups", get(controllers::list_groups).post(controllers::create_group))
        .route("/messages/:group_id", get(controllers::list_messages))
        .route("/message", post(controllers::send_message));

    Router::new()
        .route("/health", get(|Extension(state): Extension<Arc<AppState>>| async move {
            health_with_pool(&state.pool).await
        }))
        .nest("/api/community", community)
        .route("/ws", get(controllers::ws_handler))
        .layer(Extension(state))
}
