//! HTTP host for the relay (axum).

mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::mailbox::Mailboxes;
use crate::relay::SessionRelay;
use crate::store::KvStore;
use crate::worker::WorkerSet;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: SessionRelay,
    pub workers: Arc<WorkerSet>,
    pub mailboxes: Arc<Mailboxes>,
    pub store: Arc<dyn KvStore>,
    /// How long `GET /poll` waits for an event before answering `[]`.
    pub poll_hold: Duration,
    /// Upper bound on a caller-supplied `timeoutMs`.
    pub max_wait: Duration,
}

/// Build the router with every relay route.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/sessions", post(routes::create_session))
        .route("/sessions/{id}", get(routes::get_session))
        .route("/sessions/{id}/requests", post(routes::enqueue_request))
        .route(
            "/sessions/{id}/responses/{rid}",
            get(routes::await_response).post(routes::publish_response),
        )
        .route("/message", post(routes::message))
        .route("/poll", get(routes::poll))
        .route("/health", get(routes::health))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
