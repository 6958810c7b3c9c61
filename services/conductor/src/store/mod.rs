//! Resource Store.
//!
//! Persists the known state of every managed resource. Writes to an existing
//! record are conditional on its generation, so a reconciliation loop that
//! has been superseded by a newer operation can never regress the status
//! written by its successor.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{DbConfig, PgResourceStore};

use async_trait::async_trait;
use oasis_id::{NodePoolPolicyId, ResourceId, ResourceKind};
use oasis_reconcile::Generation;
use thiserror::Error;

use crate::model::{ManagedResource, NodePoolPolicy};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Resource Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A record with the same id already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// A stored row could not be decoded.
    #[error("corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record carried the expected generation and was replaced.
    Applied,
    /// A newer operation owns the record; nothing was written.
    Superseded { current: Generation },
    /// The record no longer exists; nothing was written.
    Missing,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Conflict`] on a duplicate id.
    async fn insert(&self, resource: &ManagedResource) -> StoreResult<()>;

    async fn get(&self, id: &ResourceId) -> StoreResult<Option<ManagedResource>>;

    /// List records, optionally restricted to one kind, oldest first.
    async fn list(&self, kind: Option<ResourceKind>) -> StoreResult<Vec<ManagedResource>>;

    /// Replace a record if it still carries `expected` as its generation.
    async fn save(
        &self,
        resource: &ManagedResource,
        expected: Generation,
    ) -> StoreResult<WriteOutcome>;

    /// Remove a record. Returns false if it was already gone.
    async fn destroy(&self, id: &ResourceId) -> StoreResult<bool>;

    async fn insert_policy(&self, policy: &NodePoolPolicy) -> StoreResult<()>;

    async fn get_policy(&self, id: &NodePoolPolicyId) -> StoreResult<Option<NodePoolPolicy>>;

    async fn list_policies(&self) -> StoreResult<Vec<NodePoolPolicy>>;
}
