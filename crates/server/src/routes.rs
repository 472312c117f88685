//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::{metrics_handler, register_metrics};
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers and probes)
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Upload control plane
        .route("/v1/uploads", post(handlers::create_upload))
        .route(
            "/v1/uploads/{session_id}",
            get(handlers::get_upload).delete(handlers::abort_upload),
        )
        .route(
            "/v1/uploads/{session_id}/chunks/{chunk_index}",
            put(handlers::upload_chunk),
        )
        .route(
            "/v1/uploads/{session_id}/merge",
            post(handlers::merge_upload),
        );

    let mut router = Router::new().merge(api_routes);

    // When enabled, restrict /metrics to the scraper at the network layer.
    if state.config.server.metrics_enabled {
        register_metrics();
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
