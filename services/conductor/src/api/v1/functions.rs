//! Function endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use oasis_id::{FunctionId, NodePoolId, ResourceId, ResourceKind};
use serde::Deserialize;
use tracing::info;

use super::{load_visible, parse_id, ListResponse, ResourceResponse, TimeoutQuery};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{AttributeChanges, Attributes, FunctionAttributes, FunctionChanges, ResourceSpec};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_functions).post(create_function))
        .route(
            "/{function_id}",
            get(get_function).patch(update_function).delete(delete_function),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateFunctionRequest {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub nodepool_id: Option<NodePoolId>,
    #[serde(default)]
    pub replicas: Option<u32>,
}

async fn create_function(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<TimeoutQuery>,
    Json(req): Json<CreateFunctionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = ResourceSpec {
        name: req.name,
        owner: ctx.owner.clone(),
        attributes: Attributes::Function(FunctionAttributes {
            body: req.body,
            description: req.description,
            endpoint_id: req.endpoint_id,
            nodepool_id: req.nodepool_id,
            replicas: req.replicas.unwrap_or(1),
            api_address: None,
        }),
    };

    let resource = state
        .conductor()
        .create(spec, query.timeout)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    info!(request_id = %ctx.request_id, resource_id = %resource.id, "Function create accepted");

    Ok((StatusCode::ACCEPTED, Json(ResourceResponse::from(resource))))
}

async fn list_functions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .conductor()
        .list(Some(ResourceKind::Function))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?
        .into_iter()
        .filter(|r| r.owner.project_id == ctx.owner.project_id)
        .map(ResourceResponse::from)
        .collect();

    Ok(Json(ListResponse { items }))
}

async fn get_function(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(function_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: FunctionId = parse_id(&function_id, &ctx)?;
    let resource = load_visible(&state, &ResourceId::Function(id), &ctx).await?;
    Ok(Json(ResourceResponse::from(resource)))
}

async fn update_function(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(function_id): Path<String>,
    Json(changes): Json<FunctionChanges>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ResourceId::Function(parse_id(&function_id, &ctx)?);
    load_visible(&state, &id, &ctx).await?;

    let resource = state
        .conductor()
        .update(&id, AttributeChanges::Function(changes))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok((StatusCode::ACCEPTED, Json(ResourceResponse::from(resource))))
}

async fn delete_function(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(function_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = ResourceId::Function(parse_id(&function_id, &ctx)?);
    load_visible(&state, &id, &ctx).await?;

    state
        .conductor()
        .delete(&id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    info!(request_id = %ctx.request_id, resource_id = %id, "Function delete accepted");

    Ok(StatusCode::ACCEPTED)
}
