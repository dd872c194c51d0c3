use axum::{
    Json, Router, middleware,
    routing::{get, post, put},
};
use serde_json::{Value, json};

use crate::state::AppState;
use crate::{conversations, directory, files, messages};

/// All routes. Everything except `/health` requires a bearer token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route("/conversations/{conversation_id}/archive", post(conversations::archive))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_thread).post(messages::send_message),
        )
        .route("/participants/{participant_id}", get(directory::get_participant))
        .route("/directory/search", get(directory::search))
        .route("/directory/businesses/{business_id}", put(directory::put_business))
        .route("/directory/users/{user_id}", put(directory::put_user))
        .route("/files/{*path}", get(files::download_file))
        .layer(middleware::from_fn_with_state(state.clone(), crate::middleware::require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
