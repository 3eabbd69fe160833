// Route definitions for the coderun API

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/execute",
            post(handlers::execute).options(handlers::execute_preflight),
        )
        .layer(middleware::map_response(handlers::allow_any_origin))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
