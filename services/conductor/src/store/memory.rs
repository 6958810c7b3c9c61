//! In-memory Resource Store for dev mode and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use oasis_id::{NodePoolPolicyId, ResourceId, ResourceKind};
use oasis_reconcile::Generation;
use tokio::sync::RwLock;

use super::{ResourceStore, StoreError, StoreResult, WriteOutcome};
use crate::model::{ManagedResource, NodePoolPolicy};

#[derive(Default)]
pub struct MemoryStore {
    resources: RwLock<HashMap<ResourceId, ManagedResource>>,
    policies: RwLock<HashMap<NodePoolPolicyId, NodePoolPolicy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn insert(&self, resource: &ManagedResource) -> StoreResult<()> {
        let mut resources = self.resources.write().await;
        if resources.contains_key(&resource.id) {
            return Err(StoreError::Conflict(resource.id.to_string()));
        }
        resources.insert(resource.id, resource.clone());
        Ok(())
    }

    async fn get(&self, id: &ResourceId) -> StoreResult<Option<ManagedResource>> {
        Ok(self.resources.read().await.get(id).cloned())
    }

    async fn list(&self, kind: Option<ResourceKind>) -> StoreResult<Vec<ManagedResource>> {
        let resources = self.resources.read().await;
        let mut items: Vec<_> = resources
            .values()
            .filter(|r| kind.is_none_or(|k| r.kind() == k))
            .cloned()
            .collect();
        items.sort_by_key(|r| (r.created_at, r.id));
        Ok(items)
    }

    async fn save(
        &self,
        resource: &ManagedResource,
        expected: Generation,
    ) -> StoreResult<WriteOutcome> {
        let mut resources = self.resources.write().await;
        let Some(current) = resources.get_mut(&resource.id) else {
            return Ok(WriteOutcome::Missing);
        };
        if current.generation != expected {
            return Ok(WriteOutcome::Superseded {
                current: current.generation,
            });
        }
        *current = resource.clone();
        Ok(WriteOutcome::Applied)
    }

    async fn destroy(&self, id: &ResourceId) -> StoreResult<bool> {
        Ok(self.resources.write().await.remove(id).is_some())
    }

    async fn insert_policy(&self, policy: &NodePoolPolicy) -> StoreResult<()> {
        let mut policies = self.policies.write().await;
        if policies.contains_key(&policy.id) {
            return Err(StoreError::Conflict(policy.id.to_string()));
        }
        policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_policy(&self, id: &NodePoolPolicyId) -> StoreResult<Option<NodePoolPolicy>> {
        Ok(self.policies.read().await.get(id).cloned())
    }

    async fn list_policies(&self) -> StoreResult<Vec<NodePoolPolicy>> {
        let mut items: Vec<_> = self.policies.read().await.values().cloned().collect();
        items.sort_by_key(|p| p.id);
        Ok(items)
    }
}
