use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::AppState;
use super::error::ApiError;

/// Constant-time comparison of a presented token against the configured key.
/// An empty key never matches.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Rejects the request with 401 before the handler runs unless it carries
/// the configured bearer token.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = bearer_token(&request);
    let authorized = presented.is_some_and(|token| token_matches(token, &state.api_key));
    if !authorized {
        warn!(
            path = %request.uri().path(),
            credential_present = presented.is_some(),
            "Rejected unauthenticated request"
        );
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
