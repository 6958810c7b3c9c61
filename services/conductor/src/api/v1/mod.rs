//! API v1 routes.

mod functions;
mod nodepools;
mod policies;

use std::str::FromStr;

use axum::Router;
use chrono::{DateTime, Utc};
use oasis_id::{IdError, ResourceId};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{Attributes, ManagedResource};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/functions", functions::routes())
        .nest("/nodepools", nodepools::routes())
        .nest("/nodepool_policies", policies::routes())
}

/// A function or node pool as returned by the API. Credentials are never
/// included.
#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub user_id: String,
    pub stack_id: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ManagedResource> for ResourceResponse {
    fn from(resource: ManagedResource) -> Self {
        Self {
            id: resource.id.to_string(),
            name: resource.name,
            project_id: resource.owner.project_id,
            user_id: resource.owner.user_id,
            stack_id: resource.stack_id.map(|id| id.to_string()),
            status: resource.status.to_string(),
            status_reason: resource.status_reason,
            attributes: resource.attributes,
            generation: resource.generation.value(),
            created_at: resource.created_at,
            updated_at: resource.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

/// Create timeout in minutes; zero disables the timeout.
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutQuery {
    #[serde(default)]
    pub timeout: Option<u32>,
}

pub(crate) fn parse_id<T>(raw: &str, ctx: &RequestContext) -> Result<T, ApiError>
where
    T: FromStr<Err = IdError>,
{
    raw.parse().map_err(|e: IdError| {
        ApiError::bad_request("invalid_id", e.to_string()).with_request_id(ctx.request_id.clone())
    })
}

/// Resources of other projects are reported as missing.
pub(crate) fn ensure_visible(
    resource: &ManagedResource,
    ctx: &RequestContext,
) -> Result<(), ApiError> {
    if resource.owner.project_id != ctx.owner.project_id {
        return Err(ApiError::not_found("not_found", format!("{} not found", resource.id))
            .with_request_id(ctx.request_id.clone()));
    }
    Ok(())
}

pub(crate) async fn load_visible(
    state: &AppState,
    id: &ResourceId,
    ctx: &RequestContext,
) -> Result<ManagedResource, ApiError> {
    let resource = state
        .conductor()
        .get(id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    ensure_visible(&resource, ctx)?;
    Ok(resource)
}
