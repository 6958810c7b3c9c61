//! Node pool policy endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use oasis_id::NodePoolPolicyId;
use serde::Deserialize;

use super::{parse_id, ListResponse};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::NodePoolPolicy;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_policies).post(create_policy))
        .route("/{policy_id}", get(get_policy))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub scaleup_adjust: Option<u32>,
    pub scaleup_cooldown: Option<u32>,
    pub scaleup_period: Option<u32>,
    pub scaleup_evaluation_periods: Option<u32>,
    pub scaleup_threshold: Option<u32>,
    pub scaledown_adjust: Option<u32>,
    pub scaledown_cooldown: Option<u32>,
    pub scaledown_period: Option<u32>,
    pub scaledown_evaluation_periods: Option<u32>,
    pub scaledown_threshold: Option<u32>,
}

impl From<CreatePolicyRequest> for NodePoolPolicy {
    fn from(req: CreatePolicyRequest) -> Self {
        Self {
            id: NodePoolPolicyId::new(),
            name: req.name,
            min_size: req.min_size,
            max_size: req.max_size,
            scaleup_adjust: req.scaleup_adjust,
            scaleup_cooldown: req.scaleup_cooldown,
            scaleup_period: req.scaleup_period,
            scaleup_evaluation_periods: req.scaleup_evaluation_periods,
            scaleup_threshold: req.scaleup_threshold,
            scaledown_adjust: req.scaledown_adjust,
            scaledown_cooldown: req.scaledown_cooldown,
            scaledown_period: req.scaledown_period,
            scaledown_evaluation_periods: req.scaledown_evaluation_periods,
            scaledown_threshold: req.scaledown_threshold,
        }
    }
}

async fn create_policy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreatePolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_name", "name must not be empty")
            .with_request_id(ctx.request_id));
    }

    let policy = state
        .conductor()
        .create_policy(req.into())
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok((StatusCode::CREATED, Json(policy)))
}

async fn list_policies(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .conductor()
        .list_policies()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    Ok(Json(ListResponse { items }))
}

async fn get_policy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(policy_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: NodePoolPolicyId = parse_id(&policy_id, &ctx)?;
    let policy = state
        .conductor()
        .get_policy(&id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    Ok(Json(policy))
}
