use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{artifacts, handlers, middleware::metrics_middleware, poller, sessions};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config().server.max_upload_mb.saturating_mul(1024 * 1024);

    // API routes
    let api_routes: Router<Arc<AppState>> = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Sessions
        .route(
            "/sessions",
            post(sessions::create_session).get(sessions::list_sessions),
        )
        .route(
            "/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/sessions/{id}/files",
            post(sessions::upload_files).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/sessions/{id}/upload-complete", post(sessions::upload_complete))
        .route(
            "/sessions/{id}/deface",
            post(sessions::request_deface).get(sessions::get_deface_status),
        )
        .route("/sessions/{id}/finalize", post(sessions::request_finalize))
        // Artifacts
        .route(
            "/sessions/{id}/artifacts/{*path}",
            get(artifacts::download_artifact),
        )
        // Poller
        .route("/poller/status", get(poller::get_status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(metrics_middleware)),
        )
}
