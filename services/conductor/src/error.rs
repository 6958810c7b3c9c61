//! Caller-facing errors of the Operation Handler.

use oasis_id::ResourceId;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::model::{AttributeError, ResourceStatus};
use crate::orchestrator::OrchestratorError;
use crate::store::StoreError;
use crate::template::TemplateError;

pub type ConductorResult<T> = Result<T, ConductorError>;

#[derive(Debug, Error)]
pub enum ConductorError {
    /// Rejected before any remote call, or refused by the orchestrator as
    /// malformed.
    #[error("invalid parameter value: {0}")]
    InvalidParameterValue(String),

    /// The operation is not allowed in the resource's current status.
    #[error("{operation} is not supported while {resource} is {status}")]
    NotSupported {
        operation: &'static str,
        resource: ResourceId,
        status: ResourceStatus,
    },

    /// Another operation on the resource has not finished yet.
    #[error("an operation on {0} is already in progress")]
    OperationInProgress(ResourceId),

    #[error("{0} not found")]
    NotFound(String),

    /// The record changed underneath the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TemplateError> for ConductorError {
    fn from(err: TemplateError) -> Self {
        Self::InvalidParameterValue(err.to_string())
    }
}

impl From<AttributeError> for ConductorError {
    fn from(err: AttributeError) -> Self {
        Self::InvalidParameterValue(err.to_string())
    }
}

impl ConductorError {
    /// Classify a failed submission: bad requests are the caller's fault.
    pub fn from_submission(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::BadRequest(message) => Self::InvalidParameterValue(message),
            other => Self::Orchestrator(other),
        }
    }
}
