//! Operation Handler.
//!
//! Turns create, update and delete intents into a submitted stack operation
//! plus one durable state transition, then hands the rest to a
//! reconciliation loop. Calls return as soon as the submission is recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use oasis_id::{NodePoolPolicyId, RequestId, ResourceId, ResourceKind};
use oasis_reconcile::{Generation, PollSettings};
use tracing::{debug, info, instrument, warn};

use super::poller::{PollOutcome, PollerDeps, StackPoller};
use super::registry::{ClaimTicket, Operation, PollerRegistry};
use crate::context::OperationContext;
use crate::error::{ConductorError, ConductorResult};
use crate::identity::{authorize_context, provision_credentials, revoke_credentials, Identity};
use crate::model::{
    AttributeChanges, Attributes, ManagedResource, NodePoolPolicy, ResourceSpec, ResourceStatus,
    StackAction, StackId,
};
use crate::orchestrator::{Orchestrator, Parameters, StackCreate, StackUpdate};
use crate::store::{ResourceStore, WriteOutcome};
use crate::template::{ExtraParameters, TemplateDefinition};

/// Length of the random suffix appended to stack names.
const STACK_SUFFIX_LEN: usize = 12;

/// Tunables of the handler and the loops it starts.
#[derive(Debug, Clone)]
pub struct ConductorSettings {
    pub poll: PollSettings,
    /// Create timeout in minutes used when the caller gives none.
    pub create_timeout: Option<u32>,
    pub extra: ExtraParameters,
}

/// Resolve the orchestrator timeout for a create.
///
/// An explicit zero means "no timeout"; an absent value falls back to the
/// configured default.
pub fn resolve_create_timeout(requested: Option<u32>, default: Option<u32>) -> Option<u32> {
    match requested {
        Some(0) => None,
        Some(minutes) => Some(minutes),
        None => default,
    }
}

/// Unique stack name derived from the resource name.
pub fn stack_name(resource_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", resource_name, &suffix[..STACK_SUFFIX_LEN])
}

pub struct Conductor {
    deps: PollerDeps,
    registry: PollerRegistry,
    settings: ConductorSettings,
}

impl Conductor {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        identity: Arc<dyn Identity>,
        store: Arc<dyn ResourceStore>,
        settings: ConductorSettings,
    ) -> Self {
        Self {
            deps: PollerDeps {
                orchestrator,
                identity,
                store,
                settings: settings.poll,
            },
            registry: PollerRegistry::new(),
            settings,
        }
    }

    /// Provision credentials, submit the stack and start polling it.
    ///
    /// Returns the resource in `CREATE_IN_PROGRESS`.
    #[instrument(skip_all, fields(kind = %spec.attributes.kind(), name = %spec.name))]
    pub async fn create(
        &self,
        spec: ResourceSpec,
        timeout: Option<u32>,
    ) -> ConductorResult<ManagedResource> {
        if spec.name.trim().is_empty() {
            return Err(ConductorError::InvalidParameterValue(
                "name must not be empty".to_string(),
            ));
        }
        spec.attributes.validate()?;
        let policy = self.resolve_references(&spec.attributes).await?;

        let now = Utc::now();
        let mut resource = ManagedResource {
            id: ResourceId::new(spec.attributes.kind()),
            name: spec.name,
            owner: spec.owner,
            stack_id: None,
            status: ResourceStatus::CREATE_IN_PROGRESS,
            status_reason: None,
            attributes: spec.attributes,
            trust: None,
            generation: Generation::INITIAL,
            created_at: now,
            updated_at: now,
        };
        let ticket = self.registry.claim(&resource.id, Operation::Create)?;

        match self.submit_create(&mut resource, policy.as_ref(), timeout).await {
            Ok(ctx) => {
                self.start_loop(ticket, &resource, Operation::Create, ctx);
                Ok(resource)
            }
            Err(err) => {
                self.registry.release(ticket);
                Err(err)
            }
        }
    }

    async fn submit_create(
        &self,
        resource: &mut ManagedResource,
        policy: Option<&NodePoolPolicy>,
        timeout: Option<u32>,
    ) -> ConductorResult<OperationContext> {
        let trust = provision_credentials(
            self.deps.identity.as_ref(),
            &resource.owner,
            &resource.id.to_string(),
            &self.settings.extra.trustee_domain_id,
        )
        .await?;
        resource.trust = Some(trust);

        let ctx = OperationContext::for_resource(RequestId::new(), resource);
        let ctx = match authorize_context(self.deps.identity.as_ref(), ctx).await {
            Ok(ctx) => ctx,
            Err(err) => {
                self.rollback_credentials(resource).await;
                return Err(err.into());
            }
        };
        let submitted = self.submit_stack(&ctx, resource, policy, timeout).await;
        let stack_id = match submitted {
            Ok(stack_id) => stack_id,
            Err(err) => {
                self.rollback_credentials(resource).await;
                return Err(err);
            }
        };
        info!(resource_id = %resource.id, stack_id = %stack_id, "Stack create submitted");
        resource.stack_id = Some(stack_id.clone());

        if let Err(err) = self.deps.store.insert(resource).await {
            warn!(resource_id = %resource.id, error = %err, "Failed to record resource, removing stack");
            if let Err(cleanup) = self.deps.orchestrator.submit_delete(&ctx, &stack_id).await {
                warn!(stack_id = %stack_id, error = %cleanup, "Failed to remove orphaned stack");
            }
            self.rollback_credentials(resource).await;
            return Err(err.into());
        }
        Ok(ctx)
    }

    async fn submit_stack(
        &self,
        ctx: &OperationContext,
        resource: &ManagedResource,
        policy: Option<&NodePoolPolicy>,
        timeout: Option<u32>,
    ) -> ConductorResult<StackId> {
        let definition = TemplateDefinition::for_kind(resource.kind());
        let parameters = definition.compute_parameters(resource, policy, &self.settings.extra)?;
        let request = StackCreate {
            name: stack_name(&resource.name),
            template: definition.template().to_string(),
            parameters,
            timeout_mins: resolve_create_timeout(timeout, self.settings.create_timeout),
        };
        self.deps
            .orchestrator
            .submit_create(ctx, request)
            .await
            .map_err(ConductorError::from_submission)
    }

    async fn rollback_credentials(&self, resource: &mut ManagedResource) {
        let Some(trust) = resource.trust.take() else {
            return;
        };
        if let Err(err) = revoke_credentials(self.deps.identity.as_ref(), &trust).await {
            warn!(resource_id = %resource.id, error = %err, "Failed to roll back credentials");
        }
    }

    /// Apply attribute changes to a settled resource.
    ///
    /// Changes that leave the attributes as they are return the resource
    /// untouched without contacting the orchestrator.
    #[instrument(skip_all, fields(resource_id = %id))]
    pub async fn update(
        &self,
        id: &ResourceId,
        changes: AttributeChanges,
    ) -> ConductorResult<ManagedResource> {
        let resource = self.get(id).await?;
        if !resource.status.is_update_allowed() {
            return Err(ConductorError::NotSupported {
                operation: Operation::Update.as_str(),
                resource: id.clone(),
                status: resource.status,
            });
        }

        let attributes = resource.attributes.apply(&changes)?;
        attributes.validate()?;
        if attributes.spec_hash() == resource.attributes.spec_hash() {
            debug!("Update changes nothing");
            return Ok(resource);
        }
        let policy = self.resolve_references(&attributes).await?;

        let ticket = self.registry.claim(id, Operation::Update)?;
        match self.submit_update(&resource, attributes, policy.as_ref()).await {
            Ok((updated, ctx)) => {
                self.start_loop(ticket, &updated, Operation::Update, ctx);
                Ok(updated)
            }
            Err(err) => {
                self.registry.release(ticket);
                Err(err)
            }
        }
    }

    async fn submit_update(
        &self,
        resource: &ManagedResource,
        attributes: Attributes,
        policy: Option<&NodePoolPolicy>,
    ) -> ConductorResult<(ManagedResource, OperationContext)> {
        let stack_id = resource
            .stack_id
            .clone()
            .ok_or_else(|| ConductorError::Conflict(format!("{} has no stack", resource.id)))?;

        let mut updated = resource.clone();
        updated.attributes = attributes;
        let definition = TemplateDefinition::for_kind(resource.kind());
        let parameters: Parameters =
            definition.compute_parameters(&updated, policy, &self.settings.extra)?;

        let ctx = OperationContext::for_resource(RequestId::new(), resource);
        let ctx = authorize_context(self.deps.identity.as_ref(), ctx).await?;
        let request = StackUpdate {
            template: definition.template().to_string(),
            parameters,
        };
        self.deps
            .orchestrator
            .submit_update(&ctx, &stack_id, request)
            .await
            .map_err(ConductorError::from_submission)?;
        info!(stack_id = %stack_id, "Stack update submitted");

        updated.status = ResourceStatus::UPDATE_IN_PROGRESS;
        updated.status_reason = None;
        updated.generation = resource.generation.next();
        updated.updated_at = Utc::now();
        self.save_claimed(&updated, resource.generation).await?;
        Ok((updated, ctx))
    }

    /// Revoke credentials and submit the stack delete.
    ///
    /// Preempts any create or update still polling. A stack that is already
    /// gone destroys the record right away.
    #[instrument(skip_all, fields(resource_id = %id))]
    pub async fn delete(&self, id: &ResourceId) -> ConductorResult<()> {
        let resource = self.get(id).await?;
        let ticket = self.registry.claim(id, Operation::Delete)?;

        match self.submit_delete(resource).await {
            Ok(Some((deleting, ctx))) => {
                self.start_loop(ticket, &deleting, Operation::Delete, ctx);
                Ok(())
            }
            Ok(None) => {
                self.registry.release(ticket);
                Ok(())
            }
            Err(err) => {
                self.registry.release(ticket);
                Err(err)
            }
        }
    }

    /// Returns the record to poll, or `None` when it was destroyed directly.
    async fn submit_delete(
        &self,
        resource: ManagedResource,
    ) -> ConductorResult<Option<(ManagedResource, OperationContext)>> {
        if let Some(trust) = &resource.trust {
            if let Err(err) = revoke_credentials(self.deps.identity.as_ref(), trust).await {
                warn!(error = %err, "Failed to revoke credentials, continuing with delete");
            }
        }

        let ctx = OperationContext::for_resource(RequestId::new(), &resource).with_trust(None);
        let Some(stack_id) = resource.stack_id.clone() else {
            self.deps.store.destroy(&resource.id).await?;
            info!("Resource without stack destroyed");
            return Ok(None);
        };

        match self.deps.orchestrator.submit_delete(&ctx, &stack_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                self.deps.store.destroy(&resource.id).await?;
                info!(stack_id = %stack_id, "Stack already deleted by others, record destroyed");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }
        info!(stack_id = %stack_id, "Stack delete submitted");

        // Re-read so the write starts from whatever a preempted loop last stored.
        let Some(mut deleting) = self.deps.store.get(&resource.id).await? else {
            debug!("Record destroyed while delete was submitted");
            return Ok(None);
        };
        let expected = deleting.generation;
        deleting.trust = None;
        deleting.status = ResourceStatus::DELETE_IN_PROGRESS;
        deleting.status_reason = None;
        deleting.generation = expected.next();
        deleting.updated_at = Utc::now();
        self.save_claimed(&deleting, expected).await?;
        Ok(Some((deleting, ctx)))
    }

    async fn save_claimed(
        &self,
        resource: &ManagedResource,
        expected: Generation,
    ) -> ConductorResult<()> {
        match self.deps.store.save(resource, expected).await? {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::Superseded { current } => Err(ConductorError::Conflict(format!(
                "{} moved to generation {} during submission",
                resource.id, current
            ))),
            WriteOutcome::Missing => Err(ConductorError::NotFound(resource.id.to_string())),
        }
    }

    fn start_loop(
        &self,
        ticket: ClaimTicket,
        resource: &ManagedResource,
        operation: Operation,
        ctx: OperationContext,
    ) {
        let Some(stack_id) = resource.stack_id.clone() else {
            self.registry.release(ticket);
            return;
        };
        let poller = StackPoller::new(resource, stack_id, operation, ctx, self.deps.clone());
        self.registry.attach(ticket, poller.spawn());
    }

    /// Policy referenced by node pool attributes; also checks that a
    /// function's node pool exists.
    async fn resolve_references(
        &self,
        attributes: &Attributes,
    ) -> ConductorResult<Option<NodePoolPolicy>> {
        match attributes {
            Attributes::NodePool(pool) => match pool.policy_id {
                Some(policy_id) => self.get_policy(&policy_id).await.map(Some).map_err(|err| {
                    match err {
                        ConductorError::NotFound(what) => ConductorError::InvalidParameterValue(
                            format!("node pool policy {} not found", what),
                        ),
                        other => other,
                    }
                }),
                None => Ok(None),
            },
            Attributes::Function(function) => {
                if let Some(nodepool_id) = function.nodepool_id {
                    let id = ResourceId::NodePool(nodepool_id);
                    if self.deps.store.get(&id).await?.is_none() {
                        return Err(ConductorError::InvalidParameterValue(format!(
                            "node pool {} not found",
                            id
                        )));
                    }
                }
                Ok(None)
            }
        }
    }

    pub async fn get(&self, id: &ResourceId) -> ConductorResult<ManagedResource> {
        self.deps
            .store
            .get(id)
            .await?
            .ok_or_else(|| ConductorError::NotFound(id.to_string()))
    }

    pub async fn list(&self, kind: Option<ResourceKind>) -> ConductorResult<Vec<ManagedResource>> {
        Ok(self.deps.store.list(kind).await?)
    }

    pub async fn create_policy(&self, policy: NodePoolPolicy) -> ConductorResult<NodePoolPolicy> {
        policy
            .validate()
            .map_err(ConductorError::InvalidParameterValue)?;
        self.deps.store.insert_policy(&policy).await?;
        info!(policy_id = %policy.id, name = %policy.name, "Node pool policy created");
        Ok(policy)
    }

    pub async fn get_policy(&self, id: &NodePoolPolicyId) -> ConductorResult<NodePoolPolicy> {
        self.deps
            .store
            .get_policy(id)
            .await?
            .ok_or_else(|| ConductorError::NotFound(id.to_string()))
    }

    pub async fn list_policies(&self) -> ConductorResult<Vec<NodePoolPolicy>> {
        Ok(self.deps.store.list_policies().await?)
    }

    /// Restart polling for every record left in progress by a previous run.
    ///
    /// Returns the number of loops started.
    pub async fn resume_in_progress(&self) -> ConductorResult<usize> {
        let mut resumed = 0;
        for resource in self.deps.store.list(None).await? {
            if !resource.status.is_in_progress() || resource.stack_id.is_none() {
                continue;
            }
            let operation = match resource.status.action {
                StackAction::Create => Operation::Create,
                StackAction::Delete => Operation::Delete,
                _ => Operation::Update,
            };
            let Ok(ticket) = self.registry.claim(&resource.id, operation) else {
                continue;
            };
            let ctx = OperationContext::for_resource(RequestId::new(), &resource);
            info!(resource_id = %resource.id, status = %resource.status, "Resuming reconciliation");
            self.start_loop(ticket, &resource, operation, ctx);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// True while a loop is polling the resource.
    pub fn is_polling(&self, id: &ResourceId) -> bool {
        self.registry.is_active(id)
    }

    pub fn active_loops(&self) -> usize {
        self.registry.active_count()
    }

    /// Wait for the resource's latest loop to finish.
    pub async fn wait_for(&self, id: &ResourceId) -> Option<PollOutcome> {
        self.registry.wait(id).await
    }

    /// Stop all loops, waiting up to `timeout` for them to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        self.registry.shutdown(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), Some(60), None)]
    #[case(Some(15), Some(60), Some(15))]
    #[case(None, Some(60), Some(60))]
    #[case(None, None, None)]
    fn create_timeout_resolution(
        #[case] requested: Option<u32>,
        #[case] default: Option<u32>,
        #[case] expected: Option<u32>,
    ) {
        assert_eq!(resolve_create_timeout(requested, default), expected);
    }

    #[test]
    fn stack_names_are_unique_and_prefixed() {
        let a = stack_name("hello");
        let b = stack_name("hello");
        assert!(a.starts_with("hello-"));
        assert_eq!(a.len(), "hello-".len() + STACK_SUFFIX_LEN);
        assert_ne!(a, b);
    }
}
