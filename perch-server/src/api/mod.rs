//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod build;
pub mod error;
pub mod health;
pub mod proc;
pub mod session;
pub mod stream;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Build endpoints
        .route("/api/builds/queue", get(build::get_build_queue))
        .route("/api/repos/{owner}/{name}/builds", get(build::list_builds))
        .route(
            "/api/repos/{owner}/{name}/builds/{number}",
            get(build::get_build)
                .post(build::restart_build)
                .delete(build::cancel_build),
        )
        .route(
            "/api/repos/{owner}/{name}/builds/{number}/approve",
            post(build::approve_build),
        )
        .route(
            "/api/repos/{owner}/{name}/builds/{number}/decline",
            post(build::decline_build),
        )
        // Log endpoints
        .route(
            "/api/repos/{owner}/{name}/logs/{number}",
            delete(build::delete_build_logs),
        )
        .route(
            "/api/repos/{owner}/{name}/logs/{number}/{pid}",
            get(build::get_proc_logs),
        )
        .route(
            "/api/repos/{owner}/{name}/logs/{number}/{ppid}/{proc}",
            get(build::get_build_logs),
        )
        // Agent endpoints
        .route("/api/procs/{id}/init", post(proc::init_proc))
        .route("/api/procs/{id}/logs", post(proc::append_logs))
        .route("/api/procs/{id}/done", post(proc::done_proc))
        // Streams
        .route("/stream/events", get(stream::event_stream))
        .route(
            "/stream/logs/{owner}/{name}/{build}/{number}",
            get(stream::log_stream),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
