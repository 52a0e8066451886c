//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/resource/{id}",
            get(handlers::get_resource)
                .put(handlers::put_resource)
                .delete(handlers::delete_resource),
        )
        // GET also answers HEAD; the handler branches on the method so HEAD
        // skips the body fetch.
        .route("/webseed/{id}", get(handlers::webseed_root))
        .route("/webseed/{id}/{*path}", get(handlers::webseed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
