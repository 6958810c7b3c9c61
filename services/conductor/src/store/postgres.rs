//! Postgres-backed Resource Store.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oasis_id::{NodePoolPolicyId, ResourceId, ResourceKind};
use oasis_reconcile::Generation;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use super::{ResourceStore, StoreError, StoreResult, WriteOutcome};
use crate::model::{ManagedResource, NodePoolPolicy, Owner, StackId};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/oasis".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_connections);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema.
    ///
    /// Migrations are loaded at runtime, so this works from the repo root or
    /// from the crate directory.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");

        let candidates = [
            PathBuf::from("./migrations"),
            PathBuf::from("services/conductor/migrations"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error = None;

        for dir in candidates {
            match Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await?;
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .map(StoreError::Migration)
            .unwrap_or_else(|| StoreError::Corrupt {
                id: "migrations".to_string(),
                message: "no migration directory found".to_string(),
            }))
    }
}

struct ResourceRow {
    id: String,
    name: String,
    project_id: String,
    user_id: String,
    stack_id: Option<String>,
    status: String,
    status_reason: Option<String>,
    attributes: serde_json::Value,
    trust: Option<serde_json::Value>,
    generation: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ResourceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            project_id: row.try_get("project_id")?,
            user_id: row.try_get("user_id")?,
            stack_id: row.try_get("stack_id")?,
            status: row.try_get("status")?,
            status_reason: row.try_get("status_reason")?,
            attributes: row.try_get("attributes")?,
            trust: row.try_get("trust")?,
            generation: row.try_get("generation")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ResourceRow {
    fn into_resource(self) -> StoreResult<ManagedResource> {
        let corrupt = |message: String| StoreError::Corrupt {
            id: self.id.clone(),
            message,
        };
        let id = ResourceId::parse(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let status = self.status.parse().map_err(|e: crate::model::UnknownStatus| corrupt(e.to_string()))?;
        let generation = u64::try_from(self.generation)
            .map(Generation::new)
            .map_err(|e| corrupt(e.to_string()))?;
        let trust = self.trust.clone().map(serde_json::from_value).transpose()?;

        Ok(ManagedResource {
            id,
            name: self.name,
            owner: Owner {
                project_id: self.project_id,
                user_id: self.user_id,
            },
            stack_id: self.stack_id.map(StackId::new),
            status,
            status_reason: self.status_reason,
            attributes: serde_json::from_value(self.attributes)?,
            trust,
            generation,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn generation_param(generation: Generation) -> i64 {
    i64::try_from(generation.value()).unwrap_or(i64::MAX)
}

const RESOURCE_COLUMNS: &str = "id, name, project_id, user_id, stack_id, status, status_reason, \
     attributes, trust, generation, created_at, updated_at";

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn insert(&self, resource: &ManagedResource) -> StoreResult<()> {
        let trust = resource.trust.as_ref().map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            r#"
            INSERT INTO managed_resources
                (id, kind, name, project_id, user_id, stack_id, status, status_reason,
                 attributes, trust, generation, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(resource.id.to_string())
        .bind(resource.kind().as_str())
        .bind(&resource.name)
        .bind(&resource.owner.project_id)
        .bind(&resource.owner.user_id)
        .bind(resource.stack_id.as_ref().map(StackId::as_str))
        .bind(resource.status.to_string())
        .bind(resource.status_reason.as_deref())
        .bind(serde_json::to_value(&resource.attributes)?)
        .bind(trust)
        .bind(generation_param(resource.generation))
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(resource.id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> StoreResult<Option<ManagedResource>> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM managed_resources WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResourceRow::into_resource).transpose()
    }

    async fn list(&self, kind: Option<ResourceKind>) -> StoreResult<Vec<ManagedResource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM managed_resources \
             WHERE ($1::TEXT IS NULL OR kind = $1) ORDER BY created_at, id"
        ))
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResourceRow::into_resource).collect()
    }

    async fn save(
        &self,
        resource: &ManagedResource,
        expected: Generation,
    ) -> StoreResult<WriteOutcome> {
        let trust = resource.trust.as_ref().map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE managed_resources
            SET name = $2, stack_id = $3, status = $4, status_reason = $5,
                attributes = $6, trust = $7, generation = $8, updated_at = $9
            WHERE id = $1 AND generation = $10
            "#,
        )
        .bind(resource.id.to_string())
        .bind(&resource.name)
        .bind(resource.stack_id.as_ref().map(StackId::as_str))
        .bind(resource.status.to_string())
        .bind(resource.status_reason.as_deref())
        .bind(serde_json::to_value(&resource.attributes)?)
        .bind(trust)
        .bind(generation_param(resource.generation))
        .bind(resource.updated_at)
        .bind(generation_param(expected))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(WriteOutcome::Applied);
        }

        let current: Option<i64> =
            sqlx::query_scalar("SELECT generation FROM managed_resources WHERE id = $1")
                .bind(resource.id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        Ok(match current {
            Some(g) => WriteOutcome::Superseded {
                current: Generation::new(u64::try_from(g).unwrap_or_default()),
            },
            None => WriteOutcome::Missing,
        })
    }

    async fn destroy(&self, id: &ResourceId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM managed_resources WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_policy(&self, policy: &NodePoolPolicy) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO nodepool_policies (id, name, spec) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(policy.id.to_string())
        .bind(&policy.name)
        .bind(serde_json::to_value(policy)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(policy.id.to_string()));
        }
        Ok(())
    }

    async fn get_policy(&self, id: &NodePoolPolicyId) -> StoreResult<Option<NodePoolPolicy>> {
        let spec: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT spec FROM nodepool_policies WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        Ok(spec.map(serde_json::from_value).transpose()?)
    }

    async fn list_policies(&self) -> StoreResult<Vec<NodePoolPolicy>> {
        let specs: Vec<serde_json::Value> =
            sqlx::query_scalar("SELECT spec FROM nodepool_policies ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?;

        specs
            .into_iter()
            .map(|spec| serde_json::from_value(spec).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert!(config.database_url.ends_with("/oasis"));
    }

    #[test]
    fn test_generation_param_saturates() {
        assert_eq!(generation_param(Generation::new(7)), 7);
        assert_eq!(generation_param(Generation::new(u64::MAX)), i64::MAX);
    }
}
