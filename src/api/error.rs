use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::StoreError;

const AUTH_HINT: &str = "Include header: Authorization: Bearer YOUR_API_KEY";

/// Paths advertised by the 404 body.
pub const AVAILABLE_ENDPOINTS: [&str; 7] = [
    "/health",
    "/api/summary",
    "/api/recent?hours=1",
    "/api/routes",
    "/api/route?name=ROUTE_NAME&hours=1",
    "/api/vehicles",
    "/api/locations",
];

/// Request-local failures. None of them affect the collector.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized - Valid API key required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Endpoint not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Unauthorized => json!({ "error": self.to_string(), "hint": AUTH_HINT }),
            Self::NotFound => json!({
                "error": self.to_string(),
                "available_endpoints": AVAILABLE_ENDPOINTS,
            }),
            Self::BadRequest(_) | Self::Store(_) => {
                if let Self::Store(err) = &self {
                    error!(error = %err, "API request failed");
                }
                json!({ "error": self.to_string(), "timestamp": Utc::now() })
            }
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::BadRequest("hours must be a positive integer".into()).status(),
            StatusCode::BAD_REQUEST
        );
        let store = ApiError::from(StoreError::Database(sqlx::Error::RowNotFound));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_error_text_is_exposed() {
        let err = ApiError::from(StoreError::Database(sqlx::Error::Protocol("boom".into())));
        assert!(err.to_string().contains("boom"));
    }
}
