//! Token authentication for the controller API

use super::ControllerState;
use crate::error::FleetError;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::debug;

/// Raw `Authorization` header value of the caller.
///
/// The header carries the bare token, no scheme prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerToken(pub String);

impl CallerToken {
    fn from_parts(parts: &Parts) -> Option<Self> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
            .map(|token| CallerToken(token.to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CallerToken {
    type Rejection = FleetError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts).ok_or(FleetError::Unauthorized)
    }
}

/// Reject requests whose token is not in the user table
pub async fn require_token(
    State(state): State<Arc<ControllerState>>,
    request: Request,
    next: Next,
) -> Result<Response, FleetError> {
    let (parts, body) = request.into_parts();
    let token = CallerToken::from_parts(&parts).ok_or(FleetError::Unauthorized)?;

    if !state.devices.is_known_token(&token.0).await? {
        debug!("Rejected unknown token on {}", parts.uri.path());
        return Err(FleetError::Unauthorized);
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}
