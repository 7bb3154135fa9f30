//! HTTP middleware: rate limiting and API key authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::json_error;
use super::state::AppState;

/// Checks per-IP request rate before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check(addr.ip()).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::debug!(client = %addr.ip(), retry_after, "rate limited");
            let body = serde_json::json!({
                "error": "rate limit exceeded",
                "retry_after": retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

/// When an API key is configured, every request except `/health` must
/// carry it as `Authorization: Bearer <key>` or `X-API-Key: <key>`.
///
/// The key authenticates the calling gateway, not the end user; the actor
/// headers it forwards are trusted as-is.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected_key) = &state.api_key else {
        return next.run(request).await;
    };
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let headers = request.headers();
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()));

    let rejection = match presented {
        Some(key) if key == expected_key => None,
        Some(_) => Some((StatusCode::FORBIDDEN, "invalid API key")),
        None => Some((StatusCode::UNAUTHORIZED, "authentication required")),
    };
    match rejection {
        None => next.run(request).await,
        Some((status, message)) => json_error(status, message).into_response(),
    }
}
