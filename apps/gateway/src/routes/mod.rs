pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::gateway::{frontend, handlers};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Session API
        .route("/api/v1/sessions", post(handlers::handle_create_session))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::handle_get_session).delete(handlers::handle_close_session),
        )
        // Real-time analysis stream
        .route("/ws", get(frontend::ws_handler))
        .with_state(state)
}
