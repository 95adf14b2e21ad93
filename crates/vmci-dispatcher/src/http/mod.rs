//! HTTP server for the dispatcher.
//!
//! Provides endpoints for:
//! - Worker RPC (`/dispatcher/task/*`, `/dispatcher/worker/keepalive`)
//! - Task submission and inspection (`/v1/tasks`)
//! - Worker list API (`/v1/workers`)
//! - Live task events (`/v1/events`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod error;
mod handlers;

pub use error::ApiError;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Worker RPC
        .route("/dispatcher/task/poll", post(handlers::poll_task))
        .route("/dispatcher/task/update/start", post(handlers::update_start))
        .route("/dispatcher/task/update/finish", post(handlers::update_finish))
        .route("/dispatcher/task/update/shell", post(handlers::update_shell))
        .route("/dispatcher/worker/keepalive", post(handlers::keep_alive))
        // Operator API
        .route("/v1/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/v1/tasks/:task_id", get(handlers::get_task))
        .route("/v1/tasks/:task_id/shell", get(handlers::get_task_shell))
        .route("/v1/workers", get(handlers::list_workers))
        .route("/v1/events", get(handlers::task_events))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
