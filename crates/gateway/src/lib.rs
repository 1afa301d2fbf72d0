//! # Concierge Gateway Crate
//!
//! HTTP and WebSocket surface of the chat service: the in-memory [`Hub`]
//! that tracks live sessions and their rooms, the per-connection session
//! loops, and the REST handlers that persist through the chat store before
//! notifying the hub.
//!
//! ## Architecture
//!
//! - **Hub**: session registry, room index, fan-out, reaping and presence
//! - **WebSocket**: socket upgrade and the inbound/outbound session loops
//! - **REST**: conversation, message, member, call and search endpoints
//! - **Middleware**: session-token authentication, request logging and tracing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concierge_gateway::{create_router, GatewayState, Hub};
//!
//! let (hub, reaper) = Hub::new();
//! let state = GatewayState::new(config, authenticator, store, hub);
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod hub;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{GatewayError, GatewayResult};
pub use hub::{Hub, Reaper, RouteOutcome, SessionClosed, SessionHandle};
pub use middleware::{auth_middleware, AuthUser};
pub use state::GatewayState;

use axum::{http::Method, middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);

    let protected = Router::new()
        .merge(rest::create_rest_routes())
        .merge(websocket::create_websocket_routes())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .merge(rest::create_public_routes())
        .with_state(state)
        .layer(middleware::create_trace_middleware())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                ])
                .allow_headers(Any),
        )
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
