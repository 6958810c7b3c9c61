use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::ConductorError;

/// RFC 7807 problem body.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://oasis.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            retryable: false,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::BAD_GATEWAY, code, message);
        err.problem.retryable = true;
        err
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        self.problem.request_id = request_id.clone();
        if self.problem.instance.is_none() {
            self.problem.instance = Some(request_id);
        }
        self
    }
}

impl From<ConductorError> for ApiError {
    fn from(err: ConductorError) -> Self {
        let message = err.to_string();
        match err {
            ConductorError::InvalidParameterValue(_) => {
                Self::bad_request("invalid_parameter_value", message)
            }
            ConductorError::NotSupported { .. } => Self::conflict("not_supported", message),
            ConductorError::OperationInProgress(_) => {
                Self::conflict("operation_in_progress", message)
            }
            ConductorError::Conflict(_) => Self::conflict("conflict", message),
            ConductorError::NotFound(_) => Self::not_found("not_found", message),
            ConductorError::Orchestrator(_) => Self::bad_gateway("orchestrator_error", message),
            ConductorError::Identity(_) => Self::bad_gateway("identity_error", message),
            ConductorError::Store(_) => {
                error!(error = %message, "Resource store failure");
                Self::internal("internal_error", "resource store failure")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oasis_id::FunctionId;

    #[test]
    fn conductor_errors_map_to_status_codes() {
        let cases = [
            (
                ConductorError::InvalidParameterValue("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ConductorError::OperationInProgress(FunctionId::new().into()),
                StatusCode::CONFLICT,
            ),
            (
                ConductorError::NotFound("fn".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                ConductorError::Orchestrator(crate::orchestrator::OrchestratorError::Unavailable(
                    "down".to_string(),
                )),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn request_id_fills_instance() {
        let err = ApiError::not_found("not_found", "gone").with_request_id("req_1");
        assert_eq!(err.problem.request_id, "req_1");
        assert_eq!(err.problem.instance.as_deref(), Some("req_1"));
    }
}
