//! Node pool endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use oasis_id::{NodePoolId, NodePoolPolicyId, ResourceId, ResourceKind};
use serde::Deserialize;
use tracing::info;

use super::{load_visible, parse_id, ListResponse, ResourceResponse, TimeoutQuery};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{AttributeChanges, Attributes, NodePoolAttributes, NodePoolChanges, ResourceSpec};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_nodepools).post(create_nodepool))
        .route(
            "/{nodepool_id}",
            get(get_nodepool).patch(update_nodepool).delete(delete_nodepool),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateNodePoolRequest {
    pub name: String,
    pub flavor: String,
    pub image: String,
    #[serde(default)]
    pub policy_id: Option<NodePoolPolicyId>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub node_count: Option<u32>,
}

async fn create_nodepool(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<TimeoutQuery>,
    Json(req): Json<CreateNodePoolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = ResourceSpec {
        name: req.name,
        owner: ctx.owner.clone(),
        attributes: Attributes::NodePool(NodePoolAttributes {
            policy_id: req.policy_id,
            host: req.host,
            flavor: req.flavor,
            image: req.image,
            key_name: req.key_name,
            node_count: req.node_count.unwrap_or(1),
            node_addresses: Vec::new(),
        }),
    };

    let resource = state
        .conductor()
        .create(spec, query.timeout)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    info!(request_id = %ctx.request_id, resource_id = %resource.id, "Node pool create accepted");

    Ok((StatusCode::ACCEPTED, Json(ResourceResponse::from(resource))))
}

async fn list_nodepools(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .conductor()
        .list(Some(ResourceKind::NodePool))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?
        .into_iter()
        .filter(|r| r.owner.project_id == ctx.owner.project_id)
        .map(ResourceResponse::from)
        .collect();

    Ok(Json(ListResponse { items }))
}

async fn get_nodepool(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(nodepool_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: NodePoolId = parse_id(&nodepool_id, &ctx)?;
    let resource = load_visible(&state, &ResourceId::NodePool(id), &ctx).await?;
    Ok(Json(ResourceResponse::from(resource)))
}

async fn update_nodepool(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(nodepool_id): Path<String>,
    Json(changes): Json<NodePoolChanges>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ResourceId::NodePool(parse_id(&nodepool_id, &ctx)?);
    load_visible(&state, &id, &ctx).await?;

    let resource = state
        .conductor()
        .update(&id, AttributeChanges::NodePool(changes))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok((StatusCode::ACCEPTED, Json(ResourceResponse::from(resource))))
}

async fn delete_nodepool(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(nodepool_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ResourceId::NodePool(parse_id(&nodepool_id, &ctx)?);
    load_visible(&state, &id, &ctx).await?;

    state
        .conductor()
        .delete(&id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    info!(request_id = %ctx.request_id, resource_id = %id, "Node pool delete accepted");

    Ok(StatusCode::ACCEPTED)
}
