//! HTTP gateway: read-only resource routes and the chat endpoint behind one bearer token,
//! plus an unauthenticated liveness route.

pub mod auth;
pub mod bootstrap;
pub mod chat;
pub mod error;
pub mod health;
pub mod routes;
pub mod sessions;
pub mod state;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use sessions::SessionStore;
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .nest(routes::RESOURCE_PREFIX, routes::router())
        .nest(chat::CHAT_PREFIX, chat::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .merge(health::router())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
