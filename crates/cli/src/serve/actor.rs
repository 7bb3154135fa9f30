//! Acting principal, taken from headers set by the trusted gateway.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use civic_engine::{Actor, Role};

use super::json_error;

pub(crate) const ACTOR_ID_HEADER: &str = "x-actor-id";
pub(crate) const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Extracts the `Actor` a request acts as.
pub(crate) struct RequestActor(pub(crate) Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = required_header(parts, ACTOR_ID_HEADER)?;
        let role = required_header(parts, ACTOR_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|e| json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response())?;
        Ok(RequestActor(Actor::new(id, role)))
    }
}

fn required_header(parts: &Parts, name: &str) -> Result<String, Response> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            json_error(
                StatusCode::UNAUTHORIZED,
                &format!("missing '{}' header", name),
            )
            .into_response()
        })
}
