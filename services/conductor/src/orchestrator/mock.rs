//! In-memory orchestrator for tests and local development.
//!
//! Each stack replays a script of observations, one per status read, and keeps
//! repeating the last reported status once the script runs dry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    Orchestrator, OrchestratorError, OrchestratorResult, Parameters, StackCreate, StackOutput,
    StackSnapshot, StackUpdate,
};
use crate::context::OperationContext;
use crate::model::{ResourceStatus, StackId};

/// One scripted answer to a status read.
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    /// Report this status string with an optional reason.
    Status(String, Option<String>),
    /// The stack disappears; this and later reads return not found.
    Gone,
    /// The read fails transiently.
    Unavailable,
    /// The read is refused as if the token had expired.
    Unauthorized,
}

impl MockStep {
    pub fn status(status: ResourceStatus) -> Self {
        Self::Status(status.to_string(), None)
    }

    pub fn failed(status: ResourceStatus, reason: impl Into<String>) -> Self {
        Self::Status(status.to_string(), Some(reason.into()))
    }

    /// A status string outside the known vocabulary.
    pub fn raw(status: impl Into<String>) -> Self {
        Self::Status(status.into(), None)
    }
}

/// A call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Create {
        name: String,
        parameters: Parameters,
        timeout_mins: Option<u32>,
    },
    Update {
        stack_id: StackId,
        parameters: Parameters,
    },
    Delete {
        stack_id: StackId,
    },
    GetStatus {
        stack_id: StackId,
    },
}

#[derive(Debug)]
struct MockStack {
    script: VecDeque<MockStep>,
    last: (String, Option<String>),
    outputs: Vec<StackOutput>,
    parameters: Parameters,
    timeout_mins: Option<u32>,
}

impl MockStack {
    fn play(&mut self, steps: Vec<MockStep>, fallback: ResourceStatus) {
        self.script = steps.into();
        self.last = (fallback.to_string(), None);
    }
}

#[derive(Debug, Default)]
struct MockState {
    next_stack: u64,
    stacks: HashMap<StackId, MockStack>,
    calls: Vec<MockCall>,
    /// Token presented with each entry of `calls`.
    tokens: Vec<Option<String>>,
    create_scripts: VecDeque<Vec<MockStep>>,
    update_scripts: VecDeque<Vec<MockStep>>,
    delete_scripts: VecDeque<Vec<MockStep>>,
    create_outputs: Vec<StackOutput>,
    fail_create: Option<OrchestratorError>,
    fail_update: Option<OrchestratorError>,
    fail_delete: Option<OrchestratorError>,
}

/// Scriptable [`Orchestrator`].
#[derive(Debug, Default)]
pub struct MockOrchestrator {
    state: Mutex<MockState>,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(state: &mut MockState, ctx: &OperationContext, call: MockCall) {
        state.calls.push(call);
        state.tokens.push(ctx.token.clone());
    }

    /// Script the status reads of the next created stack.
    pub fn on_next_create(&self, steps: Vec<MockStep>) {
        self.state().create_scripts.push_back(steps);
    }

    /// Script the status reads following the next update.
    pub fn on_next_update(&self, steps: Vec<MockStep>) {
        self.state().update_scripts.push_back(steps);
    }

    /// Script the status reads following the next delete.
    pub fn on_next_delete(&self, steps: Vec<MockStep>) {
        self.state().delete_scripts.push_back(steps);
    }

    /// Outputs reported by every stack created from now on.
    pub fn set_create_outputs(&self, outputs: Vec<StackOutput>) {
        self.state().create_outputs = outputs;
    }

    /// Replace the remaining script of an existing stack.
    pub fn script(&self, stack_id: &StackId, steps: Vec<MockStep>) {
        if let Some(stack) = self.state().stacks.get_mut(stack_id) {
            stack.script = steps.into();
        }
    }

    /// Change a parameter the stack reports, as an out-of-band scale would.
    pub fn set_stack_parameter(&self, stack_id: &StackId, key: &str, value: serde_json::Value) {
        if let Some(stack) = self.state().stacks.get_mut(stack_id) {
            stack.parameters.insert(key.to_string(), value);
        }
    }

    pub fn fail_next_create(&self, error: OrchestratorError) {
        self.state().fail_create = Some(error);
    }

    pub fn fail_next_update(&self, error: OrchestratorError) {
        self.state().fail_update = Some(error);
    }

    pub fn fail_next_delete(&self, error: OrchestratorError) {
        self.state().fail_delete = Some(error);
    }

    /// Delete a stack out of band.
    pub fn remove_stack(&self, stack_id: &StackId) {
        self.state().stacks.remove(stack_id);
    }

    pub fn has_stack(&self, stack_id: &StackId) -> bool {
        self.state().stacks.contains_key(stack_id)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Each recorded call paired with the token it carried.
    pub fn calls_with_tokens(&self) -> Vec<(MockCall, Option<String>)> {
        let state = self.state();
        state
            .calls
            .iter()
            .cloned()
            .zip(state.tokens.iter().cloned())
            .collect()
    }

    /// Number of status reads issued for a stack.
    pub fn status_reads(&self, stack_id: &StackId) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::GetStatus { stack_id: id } if id == stack_id))
            .count()
    }

    pub fn create_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Create { .. }))
            .count()
    }

    pub fn update_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Update { .. }))
            .count()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn submit_create(
        &self,
        ctx: &OperationContext,
        request: StackCreate,
    ) -> OrchestratorResult<StackId> {
        let mut state = self.state();
        Self::record(
            &mut state,
            ctx,
            MockCall::Create {
                name: request.name.clone(),
                parameters: request.parameters.clone(),
                timeout_mins: request.timeout_mins,
            },
        );
        if let Some(error) = state.fail_create.take() {
            return Err(error);
        }

        state.next_stack += 1;
        let stack_id = StackId::new(format!("stack-{}", state.next_stack));
        let script = state
            .create_scripts
            .pop_front()
            .unwrap_or_else(|| vec![MockStep::status(ResourceStatus::CREATE_IN_PROGRESS)]);
        let mut stack = MockStack {
            script: VecDeque::new(),
            last: (String::new(), None),
            outputs: state.create_outputs.clone(),
            parameters: request.parameters,
            timeout_mins: request.timeout_mins,
        };
        stack.play(script, ResourceStatus::CREATE_IN_PROGRESS);
        state.stacks.insert(stack_id.clone(), stack);

        info!(stack_id = %stack_id, stack_name = %request.name, "[MOCK] Stack created");
        Ok(stack_id)
    }

    async fn submit_update(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
        request: StackUpdate,
    ) -> OrchestratorResult<()> {
        let mut state = self.state();
        Self::record(
            &mut state,
            ctx,
            MockCall::Update {
                stack_id: stack_id.clone(),
                parameters: request.parameters.clone(),
            },
        );
        if let Some(error) = state.fail_update.take() {
            return Err(error);
        }

        let script = state
            .update_scripts
            .pop_front()
            .unwrap_or_else(|| vec![MockStep::status(ResourceStatus::UPDATE_IN_PROGRESS)]);
        let stack = state
            .stacks
            .get_mut(stack_id)
            .ok_or_else(|| OrchestratorError::NotFound(stack_id.to_string()))?;
        stack.parameters.extend(request.parameters);
        stack.play(script, ResourceStatus::UPDATE_IN_PROGRESS);

        info!(stack_id = %stack_id, "[MOCK] Stack update submitted");
        Ok(())
    }

    async fn submit_delete(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
    ) -> OrchestratorResult<()> {
        let mut state = self.state();
        Self::record(
            &mut state,
            ctx,
            MockCall::Delete {
                stack_id: stack_id.clone(),
            },
        );
        if let Some(error) = state.fail_delete.take() {
            return Err(error);
        }

        let script = state.delete_scripts.pop_front().unwrap_or_else(|| {
            vec![
                MockStep::status(ResourceStatus::DELETE_IN_PROGRESS),
                MockStep::status(ResourceStatus::DELETE_COMPLETE),
            ]
        });
        let stack = state
            .stacks
            .get_mut(stack_id)
            .ok_or_else(|| OrchestratorError::NotFound(stack_id.to_string()))?;
        stack.play(script, ResourceStatus::DELETE_IN_PROGRESS);

        info!(stack_id = %stack_id, "[MOCK] Stack delete submitted");
        Ok(())
    }

    async fn get_status(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
    ) -> OrchestratorResult<StackSnapshot> {
        let mut state = self.state();
        Self::record(
            &mut state,
            ctx,
            MockCall::GetStatus {
                stack_id: stack_id.clone(),
            },
        );

        let not_found = || OrchestratorError::NotFound(stack_id.to_string());
        let stack = state.stacks.get_mut(stack_id).ok_or_else(not_found)?;
        match stack.script.pop_front() {
            Some(MockStep::Gone) => {
                state.stacks.remove(stack_id);
                return Err(not_found());
            }
            Some(MockStep::Unavailable) => {
                return Err(OrchestratorError::Unavailable("mock outage".to_string()));
            }
            Some(MockStep::Unauthorized) => {
                return Err(OrchestratorError::Unauthorized("mock token expired".to_string()));
            }
            Some(MockStep::Status(status, reason)) => stack.last = (status, reason),
            None => {}
        }

        let (status, status_reason) = stack.last.clone();
        debug!(stack_id = %stack_id, status = %status, "[MOCK] Stack status read");
        Ok(StackSnapshot {
            id: stack_id.clone(),
            status,
            status_reason,
            outputs: stack.outputs.clone(),
            parameters: stack.parameters.clone(),
            timeout_mins: stack.timeout_mins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Owner;
    use oasis_id::RequestId;

    fn ctx() -> OperationContext {
        OperationContext::new(
            RequestId::new(),
            Owner {
                project_id: "p1".to_string(),
                user_id: "u1".to_string(),
            },
        )
    }

    fn create_request() -> StackCreate {
        StackCreate {
            name: "fn-1".to_string(),
            template: String::new(),
            parameters: Parameters::new(),
            timeout_mins: None,
        }
    }

    #[tokio::test]
    async fn script_replays_then_repeats_last_status() {
        let mock = MockOrchestrator::new();
        mock.on_next_create(vec![
            MockStep::status(ResourceStatus::CREATE_IN_PROGRESS),
            MockStep::status(ResourceStatus::CREATE_COMPLETE),
        ]);
        let ctx = ctx();
        let id = mock.submit_create(&ctx, create_request()).await.unwrap();

        let first = mock.get_status(&ctx, &id).await.unwrap();
        let second = mock.get_status(&ctx, &id).await.unwrap();
        let third = mock.get_status(&ctx, &id).await.unwrap();

        assert_eq!(first.status, "CREATE_IN_PROGRESS");
        assert_eq!(second.status, "CREATE_COMPLETE");
        assert_eq!(third.status, "CREATE_COMPLETE");
        assert_eq!(mock.status_reads(&id), 3);
    }

    #[tokio::test]
    async fn gone_step_removes_stack() {
        let mock = MockOrchestrator::new();
        mock.on_next_create(vec![MockStep::Gone]);
        let ctx = ctx();
        let id = mock.submit_create(&ctx, create_request()).await.unwrap();

        let err = mock.get_status(&ctx, &id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!mock.has_stack(&id));
        assert!(mock.submit_delete(&ctx, &id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let mock = MockOrchestrator::new();
        mock.fail_next_create(OrchestratorError::BadRequest("bad".to_string()));
        let ctx = ctx();

        assert!(mock.submit_create(&ctx, create_request()).await.is_err());
        assert!(mock.submit_create(&ctx, create_request()).await.is_ok());
        assert_eq!(mock.create_calls(), 2);
    }
}
