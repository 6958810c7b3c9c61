//! Orchestrator Client.
//!
//! A narrow interface over the external stack orchestrator. The conductor only
//! ever creates, updates, deletes and reads the status of whole stacks.

mod heat;
mod mock;

pub use heat::HeatClient;
pub use mock::{MockCall, MockOrchestrator, MockStep};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::OperationContext;
use crate::model::{ResourceStatus, StackId, UnknownStatus};

/// Parameter set passed to a stack template.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Result type for orchestrator calls.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Orchestrator errors, classified for the caller.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// The orchestrator rejected the request as malformed.
    #[error("orchestrator rejected request: {0}")]
    BadRequest(String),

    /// The stack does not exist (already deleted, possibly out of band).
    #[error("stack not found: {0}")]
    NotFound(String),

    /// The token was refused, usually because it expired.
    #[error("orchestrator refused credentials: {0}")]
    Unauthorized(String),

    /// The orchestrator could not be reached or is temporarily failing.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    /// Any other non-success response.
    #[error("unexpected orchestrator response {status}: {body}")]
    Unexpected { status: u16, body: String },

    /// A response body could not be understood.
    #[error("failed to decode orchestrator response: {0}")]
    Decode(String),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Worth polling again on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Request to create a stack.
#[derive(Debug, Clone)]
pub struct StackCreate {
    /// Unique stack name.
    pub name: String,
    pub template: String,
    pub parameters: Parameters,
    /// Orchestrator-side timeout; `None` means no timeout.
    pub timeout_mins: Option<u32>,
}

/// Request to update an existing stack.
#[derive(Debug, Clone)]
pub struct StackUpdate {
    pub template: String,
    pub parameters: Parameters,
}

/// One output reported by a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutput {
    pub output_key: String,
    #[serde(default)]
    pub output_value: serde_json::Value,
}

/// Point-in-time view of a stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSnapshot {
    pub id: StackId,
    /// Status string exactly as reported.
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
    /// Parameters the stack is currently running with.
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub timeout_mins: Option<u32>,
}

impl StackSnapshot {
    pub fn parsed_status(&self) -> Result<ResourceStatus, UnknownStatus> {
        self.status.parse()
    }

    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        self.outputs
            .iter()
            .find(|output| output.output_key == key)
            .map(|output| &output.output_value)
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submit a stack create and return the new stack's handle.
    async fn submit_create(
        &self,
        ctx: &OperationContext,
        request: StackCreate,
    ) -> OrchestratorResult<StackId>;

    async fn submit_update(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
        request: StackUpdate,
    ) -> OrchestratorResult<()>;

    /// Submit a stack delete. [`OrchestratorError::NotFound`] means the stack
    /// is already gone.
    async fn submit_delete(&self, ctx: &OperationContext, stack_id: &StackId)
        -> OrchestratorResult<()>;

    async fn get_status(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
    ) -> OrchestratorResult<StackSnapshot>;
}
