use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/voice/sessions", post(handlers::create_session))
        .route(
            "/voice/sessions/:session_id",
            axum::routing::delete(handlers::delete_session),
        )
        .route(
            "/voice/sessions/:session_id/connect",
            post(handlers::connect_session),
        )
        // Voice mode
        .route(
            "/voice/sessions/:session_id/start",
            post(handlers::start_voice),
        )
        .route("/voice/sessions/:session_id/stop", post(handlers::stop_voice))
        // Queries
        .route(
            "/voice/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/voice/sessions/:session_id/messages",
            get(handlers::get_session_messages),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
