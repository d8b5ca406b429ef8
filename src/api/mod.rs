//! Authenticated, read-only HTTP view over the observation store.
//!
//! `/health` is public. Every `/api/*` route sits behind
//! [`auth::require_bearer`]; unknown paths get a 404 listing the valid ones
//! without any credential check.

pub mod auth;
pub mod error;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::middleware::{from_fn_with_state, map_response};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

pub use error::ApiError;

use crate::services::ObservationStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObservationStore>,
    pub api_key: Arc<str>,
    pub service_name: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        api_key: impl Into<Arc<str>>,
        service_name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            api_key: api_key.into(),
            service_name: service_name.into(),
        }
    }
}

async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/summary", get(handlers::summary))
        .route("/api/recent", get(handlers::recent))
        .route("/api/routes", get(handlers::routes))
        .route("/api/route", get(handlers::route))
        .route("/api/vehicles", get(handlers::vehicles))
        .route("/api/locations", get(handlers::locations))
        .route_layer(from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .fallback(handlers::not_found)
        .layer(map_response(allow_any_origin))
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` resolves, then drains
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Query API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
