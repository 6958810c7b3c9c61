//! Request-scoped context extracted from HTTP requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use oasis_id::RequestId;

use crate::api::error::ApiError;
use crate::model::Owner;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity as asserted by the fronting authentication proxy.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub owner: Owner,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The request's id, as set by the request-id layer or sent by the caller.
pub fn request_id(headers: &HeaderMap) -> String {
    header_string(headers, REQUEST_ID_HEADER).unwrap_or_else(|| RequestId::new().to_string())
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = request_id(&parts.headers);

        let missing = |header: &str| {
            ApiError::unauthorized("missing_identity", format!("{header} header is required"))
                .with_request_id(request_id.clone())
        };
        let project_id = header_string(&parts.headers, PROJECT_ID_HEADER)
            .ok_or_else(|| missing("X-Project-Id"))?;
        let user_id =
            header_string(&parts.headers, USER_ID_HEADER).ok_or_else(|| missing("X-User-Id"))?;

        Ok(Self {
            request_id,
            owner: Owner {
                project_id,
                user_id,
            },
        })
    }
}
