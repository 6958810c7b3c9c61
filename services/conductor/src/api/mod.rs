//! HTTP surface of the conductor.
//!
//! Every request gets an `x-request-id` (the caller's, or a fresh UUID) that
//! is echoed on the response and recorded on the request span.

pub mod error;
mod health;
pub mod request_context;
mod v1;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, Uri},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info_span;

use self::error::ApiError;
use self::request_context::{request_id, PROJECT_ID_HEADER, REQUEST_ID_HEADER, USER_ID_HEADER};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id(request.headers()),
        )
    });

    Router::new()
        .merge(health::routes())
        .nest("/v1", v1::routes())
        .fallback(route_not_found)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors_layer())
        .with_state(state)
}

/// Browsers may call the API directly; identity still comes from headers.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(PROJECT_ID_HEADER),
            header::HeaderName::from_static(USER_ID_HEADER),
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([header::HeaderName::from_static(REQUEST_ID_HEADER)])
        .allow_origin(Any)
}

async fn route_not_found(headers: HeaderMap, uri: Uri) -> ApiError {
    ApiError::not_found("route_not_found", format!("no route matches {}", uri.path()))
        .with_request_id(request_id(&headers))
}
