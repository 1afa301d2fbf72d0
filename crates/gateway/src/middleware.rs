//! Middleware for authentication and other cross-cutting concerns

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::{GatewayError, GatewayResult};
use crate::state::GatewayState;

pub const SYSTEM_TOKEN_HEADER: &str = "x-system-token";

/// Verified caller identity inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
    pub company_id: i64,
    pub public_id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract a bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

/// Resolve the session token from the Authorization header or, for socket
/// upgrades, the `token` query parameter.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let query_token = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty());

    let token = bearer_token(request.headers())
        .or(query_token)
        .ok_or_else(|| {
            GatewayError::AuthenticationFailed("Missing authentication token".to_string())
        })?;

    let (user, _session) = state.authenticator().authenticate_token(&token).await?;

    request.extensions_mut().insert(AuthUser {
        id: user.id,
        company_id: user.company_id,
        public_id: user.public_id,
        display_name: user.display_name,
    });

    Ok(next.run(request).await)
}

/// Check the shared secret on server-to-server calls. Refuses every call
/// while no secret is configured.
pub fn require_system_token(headers: &HeaderMap, state: &GatewayState) -> GatewayResult<()> {
    let Some(expected) = state.config().auth.system_token.as_deref() else {
        return Err(GatewayError::AuthorizationFailed(
            "system notifications are disabled".to_string(),
        ));
    };

    let provided = headers
        .get(SYSTEM_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| GatewayError::AuthenticationFailed("Missing system token".to_string()))?;

    if provided != expected {
        return Err(GatewayError::AuthenticationFailed(
            "Invalid system token".to_string(),
        ));
    }
    Ok(())
}

/// Create tracing middleware
pub fn create_trace_middleware() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}

/// Logging middleware for request/response logging
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}
