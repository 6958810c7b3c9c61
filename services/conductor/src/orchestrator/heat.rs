//! HTTP client for a Heat-compatible orchestration API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    Orchestrator, OrchestratorError, OrchestratorResult, Parameters, StackCreate, StackOutput,
    StackSnapshot, StackUpdate,
};
use crate::context::OperationContext;
use crate::model::StackId;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator backed by the Heat v1 REST API.
///
/// Stacks are scoped by the owning project taken from the operation context.
/// Requests carry the context's trust-scoped token, or the service token when
/// the context has no trust.
#[derive(Clone)]
pub struct HeatClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HeatClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OrchestratorError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn stacks_url(&self, ctx: &OperationContext) -> String {
        format!("{}/v1/{}/stacks", self.base_url, ctx.owner.project_id)
    }

    fn stack_url(&self, ctx: &OperationContext, stack_id: &StackId) -> String {
        format!("{}/{}", self.stacks_url(ctx), stack_id)
    }

    fn authorize(&self, ctx: &OperationContext, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("X-Request-Id", ctx.request_id.to_string());
        let token = if ctx.trust.is_some() {
            ctx.token.as_ref()
        } else {
            self.auth_token.as_ref()
        };
        match token {
            Some(token) => request.header(AUTH_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> OrchestratorResult<Response> {
        request.send().await.map_err(|e| {
            warn!(error = %e, "Orchestrator request failed");
            OrchestratorError::Unavailable(e.to_string())
        })
    }
}

/// Map a non-success response to a classified error.
async fn classify(response: Response) -> OrchestratorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    debug!(status = %status, body = %body, "Orchestrator returned an error");

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            OrchestratorError::BadRequest(body)
        }
        StatusCode::NOT_FOUND => OrchestratorError::NotFound(body),
        StatusCode::UNAUTHORIZED => OrchestratorError::Unauthorized(body),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            OrchestratorError::Unavailable(format!("{}: {}", s, body))
        }
        s => OrchestratorError::Unexpected {
            status: s.as_u16(),
            body,
        },
    }
}

#[derive(Debug, Serialize)]
struct CreateStackBody<'a> {
    stack_name: &'a str,
    template: &'a str,
    parameters: &'a Parameters,
    files: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_mins: Option<u32>,
    disable_rollback: bool,
}

#[derive(Debug, Serialize)]
struct UpdateStackBody<'a> {
    template: &'a str,
    parameters: &'a Parameters,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StackEnvelope<T> {
    stack: T,
}

#[derive(Debug, Deserialize)]
struct CreatedStack {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StackBody {
    id: String,
    stack_status: String,
    #[serde(default)]
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<StackOutput>>,
    #[serde(default)]
    parameters: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    timeout_mins: Option<u32>,
}

impl From<StackBody> for StackSnapshot {
    fn from(body: StackBody) -> Self {
        Self {
            id: StackId::new(body.id),
            status: body.stack_status,
            status_reason: body.stack_status_reason.filter(|r| !r.is_empty()),
            outputs: body.outputs.unwrap_or_default(),
            parameters: body.parameters.unwrap_or_default(),
            timeout_mins: body.timeout_mins,
        }
    }
}

#[async_trait]
impl Orchestrator for HeatClient {
    async fn submit_create(
        &self,
        ctx: &OperationContext,
        request: StackCreate,
    ) -> OrchestratorResult<StackId> {
        let body = CreateStackBody {
            stack_name: &request.name,
            template: &request.template,
            parameters: &request.parameters,
            files: BTreeMap::new(),
            timeout_mins: request.timeout_mins,
            disable_rollback: true,
        };
        debug!(stack_name = %request.name, "Submitting stack create");

        let response = self
            .send(self.authorize(ctx, self.client.post(self.stacks_url(ctx)).json(&body)))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }

        let created: StackEnvelope<CreatedStack> = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Decode(e.to_string()))?;
        Ok(StackId::new(created.stack.id))
    }

    async fn submit_update(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
        request: StackUpdate,
    ) -> OrchestratorResult<()> {
        let body = UpdateStackBody {
            template: &request.template,
            parameters: &request.parameters,
            files: BTreeMap::new(),
        };
        debug!(stack_id = %stack_id, "Submitting stack update");

        let response = self
            .send(self.authorize(ctx, self.client.put(self.stack_url(ctx, stack_id)).json(&body)))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        Ok(())
    }

    async fn submit_delete(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
    ) -> OrchestratorResult<()> {
        debug!(stack_id = %stack_id, "Submitting stack delete");

        let response = self
            .send(self.authorize(ctx, self.client.delete(self.stack_url(ctx, stack_id))))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        Ok(())
    }

    async fn get_status(
        &self,
        ctx: &OperationContext,
        stack_id: &StackId,
    ) -> OrchestratorResult<StackSnapshot> {
        let response = self
            .send(self.authorize(ctx, self.client.get(self.stack_url(ctx, stack_id))))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }

        let stack: StackEnvelope<StackBody> = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Decode(e.to_string()))?;
        Ok(stack.stack.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_body_defaults_missing_fields() {
        let body: StackEnvelope<StackBody> = serde_json::from_str(
            r#"{"stack": {"id": "abc", "stack_status": "CREATE_IN_PROGRESS", "stack_status_reason": ""}}"#,
        )
        .unwrap();
        let snapshot = StackSnapshot::from(body.stack);

        assert_eq!(snapshot.id.as_str(), "abc");
        assert_eq!(snapshot.status, "CREATE_IN_PROGRESS");
        assert!(snapshot.status_reason.is_none());
        assert!(snapshot.outputs.is_empty());
        assert!(snapshot.timeout_mins.is_none());
    }

    #[test]
    fn create_body_omits_absent_timeout() {
        let parameters = Parameters::new();
        let body = CreateStackBody {
            stack_name: "fn-abc",
            template: "heat_template_version: 2016-10-14",
            parameters: &parameters,
            files: BTreeMap::new(),
            timeout_mins: None,
            disable_rollback: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("timeout_mins").is_none());
        assert_eq!(json["stack_name"], "fn-abc");
    }
}
