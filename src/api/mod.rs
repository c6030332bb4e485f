//! HTTP API
//!
//! | Method | Path | Success |
//! |---|---|---|
//! | GET | `/v0/entity?id=<key>` | 200 + value, 404 when absent |
//! | PUT | `/v0/entity?id=<key>` | 201 |
//! | DELETE | `/v0/entity?id=<key>` | 202 |
//! | GET | `/v0/status` | 200, 503 once writes are halted |
//! | GET | `/v0/entities?start=<key>[&end=<key>]` | 200 + streamed records |
//!
//! Unknown paths, unknown methods and bad keys answer 400. Engine failures
//! answer 500 with an empty body, an exhausted byte budget 503.

mod body;
mod extract;
mod handlers;
pub mod params;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::StrataError;
use crate::governor::Governor;

pub use body::{Permitted, ScanBody, ScanChunk};
pub use extract::{EntityBody, EntityKey};

pub const ENTITY_PATH: &str = "/v0/entity";
pub const STATUS_PATH: &str = "/v0/status";
pub const ENTITIES_PATH: &str = "/v0/entities";

/// Everything a handler needs
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub governor: Arc<Governor>,
    /// Deadline for a request body, and for a scan client to take a chunk
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, governor: Arc<Governor>, config: &Config) -> Self {
        Self {
            engine,
            governor,
            request_timeout: config.request_timeout(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            ENTITY_PATH,
            get(handlers::get_entity)
                .put(handlers::put_entity)
                .delete(handlers::delete_entity)
                .fallback(handlers::bad_request),
        )
        .route(
            STATUS_PATH,
            get(handlers::status).fallback(handlers::bad_request),
        )
        .route(
            ENTITIES_PATH,
            get(handlers::scan).fallback(handlers::bad_request),
        )
        .fallback(handlers::bad_request)
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), count_admitted))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn count_admitted(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.governor.record_admitted();
    next.run(request).await
}

/// A bodiless response that also ends the connection
pub(crate) fn closing(status: StatusCode) -> Response {
    (status, [(header::CONNECTION, "close")]).into_response()
}

impl IntoResponse for StrataError {
    fn into_response(self) -> Response {
        let status = match &self {
            StrataError::InvalidKey | StrataError::Protocol(_) => StatusCode::BAD_REQUEST,
            StrataError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::warn!("Request failed with {}: {}", status, self);
        } else {
            tracing::debug!("Bad request: {}", self);
        }
        status.into_response()
    }
}
