//! Reconciliation Loop.
//!
//! One task per submitted operation. Each tick reads the stored record and the
//! stack status, then either finishes the operation or records progress. Ticks
//! run strictly one after another and every write is conditional on the
//! generation the loop was started with.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use oasis_id::ResourceId;
use oasis_reconcile::{AttemptBudget, Generation, PollSettings};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::registry::{ActivePoller, Operation};
use crate::context::OperationContext;
use crate::identity::{authorize_context, revoke_credentials, Identity, IdentityResult};
use crate::model::{ManagedResource, ResourceStatus, StackId};
use crate::orchestrator::{Orchestrator, StackSnapshot};
use crate::store::{ResourceStore, WriteOutcome};
use crate::template::TemplateDefinition;

/// How a loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The stack is gone and the record was destroyed.
    Deleted,
    /// The operation reached a success status.
    Completed(ResourceStatus),
    /// The operation reached a failure status.
    Failed(ResourceStatus),
    /// The attempt ceiling was passed without a terminal status.
    Exhausted { attempts: u32 },
    /// A newer operation owns the record, or the record is gone.
    Superseded,
    /// Stopped by shutdown.
    Cancelled,
    /// An unexpected error ended the loop; nothing further was written.
    Aborted(String),
}

/// Shared collaborators of every loop.
#[derive(Clone)]
pub struct PollerDeps {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub identity: Arc<dyn Identity>,
    pub store: Arc<dyn ResourceStore>,
    pub settings: PollSettings,
}

pub struct StackPoller {
    resource_id: ResourceId,
    stack_id: StackId,
    operation: Operation,
    generation: Generation,
    ctx: OperationContext,
    definition: TemplateDefinition,
    deps: PollerDeps,
    budget: AttemptBudget,
    /// Timeout the orchestrator reported for the stack, if any.
    remote_timeout: Option<u32>,
}

type Tick = Option<PollOutcome>;

impl StackPoller {
    pub fn new(
        resource: &ManagedResource,
        stack_id: StackId,
        operation: Operation,
        ctx: OperationContext,
        deps: PollerDeps,
    ) -> Self {
        Self {
            resource_id: resource.id.clone(),
            stack_id,
            operation,
            generation: resource.generation,
            ctx,
            definition: TemplateDefinition::for_kind(resource.kind()),
            budget: AttemptBudget::new(deps.settings.max_attempts),
            deps,
            remote_timeout: None,
        }
    }

    /// Start the loop on its own task.
    pub fn spawn(self) -> ActivePoller {
        let (stop, stop_rx) = watch::channel(false);
        let (outcome_tx, outcome) = watch::channel(None);
        let operation = self.operation;
        let generation = self.generation;

        let handle = tokio::spawn(async move {
            let result = self.run(stop_rx).await;
            outcome_tx.send_replace(Some(result));
        });

        ActivePoller {
            operation,
            generation,
            stop,
            outcome,
            handle,
        }
    }

    /// Poll until the operation settles or the loop is stopped.
    ///
    /// Sleeps before every tick, including the first.
    #[instrument(
        skip_all,
        name = "reconcile",
        fields(
            resource_id = %self.resource_id,
            stack_id = %self.stack_id,
            operation = %self.operation,
            generation = %self.generation,
        )
    )]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PollOutcome {
        debug!("Reconciliation loop started");
        let wait_interval: Duration = self.deps.settings.wait_interval;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(attempts = self.budget.attempts(), "Reconciliation loop stopped");
                        return PollOutcome::Cancelled;
                    }
                    continue;
                }
                _ = sleep(wait_interval) => {}
            }

            if let Some(outcome) = self.tick().await {
                debug!(outcome = ?outcome, attempts = self.budget.attempts(), "Reconciliation loop finished");
                return outcome;
            }
        }
    }

    async fn tick(&mut self) -> Tick {
        let attempt = self.budget.record();

        let current = match self.load_current().await {
            Ok(current) => current,
            Err(outcome) => return Some(outcome),
        };

        if let Err(err) = self.refresh_token().await {
            warn!(attempt, error = %err, "Failed to obtain a trust-scoped token");
            return self.check_budget();
        }

        let snapshot = match self
            .deps
            .orchestrator
            .get_status(&self.ctx, &self.stack_id)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_unauthorized() => {
                warn!(attempt, error = %err, "Token refused, requesting a new one next tick");
                self.ctx.token = None;
                return self.check_budget();
            }
            Err(err) if err.is_not_found() => {
                info!("Stack no longer exists, treating as deleted");
                return Some(self.finish_delete(&current).await);
            }
            Err(err) if err.is_transient() => {
                warn!(attempt, error = %err, "Failed to fetch stack status");
                return self.check_budget();
            }
            Err(err) => {
                error!(error = %err, "Unexpected error fetching stack status");
                return Some(PollOutcome::Aborted(err.to_string()));
            }
        };
        self.remote_timeout = snapshot.timeout_mins;

        let status = match snapshot.parsed_status() {
            Ok(status) => status,
            Err(unknown) => {
                warn!(attempt, status = %unknown.0, "Stack reported an unknown status");
                return self.check_budget();
            }
        };

        if status == ResourceStatus::DELETE_COMPLETE {
            return Some(self.finish_delete(&current).await);
        }

        if status.is_complete() {
            return Some(self.finish_success(current, status, &snapshot).await);
        }

        if status.is_failed() {
            return Some(self.finish_failure(current, status, &snapshot).await);
        }

        if status != current.status {
            if let Err(outcome) = self.record_progress(current, status, &snapshot).await {
                return Some(outcome);
            }
        } else {
            debug!(attempt, status = %status, "Stack status unchanged");
        }

        self.check_budget()
    }

    /// Obtain a trust-scoped token when the context holds a trust but no token.
    async fn refresh_token(&mut self) -> IdentityResult<()> {
        if !self.ctx.needs_token() {
            return Ok(());
        }
        let ctx = self.ctx.clone();
        self.ctx = authorize_context(self.deps.identity.as_ref(), ctx).await?;
        Ok(())
    }

    /// Read the record and make sure this loop still owns it.
    async fn load_current(&self) -> Result<ManagedResource, PollOutcome> {
        match self.deps.store.get(&self.resource_id).await {
            Ok(Some(resource)) => {
                let id = self.resource_id.to_string();
                if let Err(err) = self.generation.ensure_current(&id, resource.generation) {
                    debug!(error = %err, "Loop superseded by a newer operation");
                    return Err(PollOutcome::Superseded);
                }
                Ok(resource)
            }
            Ok(None) => {
                debug!("Record is gone, stopping quietly");
                Err(PollOutcome::Superseded)
            }
            Err(err) => {
                error!(error = %err, "Failed to load record");
                Err(PollOutcome::Aborted(err.to_string()))
            }
        }
    }

    async fn finish_delete(&self, current: &ManagedResource) -> PollOutcome {
        if let Err(err) = self.deps.store.destroy(&self.resource_id).await {
            error!(error = %err, "Failed to destroy record");
            return PollOutcome::Aborted(err.to_string());
        }

        if let Some(trust) = current.trust.as_ref().or(self.ctx.trust.as_ref()) {
            if let Err(err) = revoke_credentials(self.deps.identity.as_ref(), trust).await {
                warn!(error = %err, "Failed to revoke credentials of deleted resource");
            }
        }

        info!("Resource deleted");
        PollOutcome::Deleted
    }

    async fn finish_success(
        &self,
        mut resource: ManagedResource,
        status: ResourceStatus,
        snapshot: &StackSnapshot,
    ) -> PollOutcome {
        self.apply_outputs(&mut resource, snapshot);
        self.sync_live_count(&mut resource, snapshot);
        resource.status = status;
        resource.status_reason = snapshot.status_reason.clone();

        match self.persist(resource).await {
            Ok(_) => {
                info!(status = %status, attempts = self.budget.attempts(), "Stack operation complete");
                PollOutcome::Completed(status)
            }
            Err(outcome) => outcome,
        }
    }

    /// Record a failure status together with whatever the stack reported.
    async fn finish_failure(
        &self,
        current: ManagedResource,
        status: ResourceStatus,
        snapshot: &StackSnapshot,
    ) -> PollOutcome {
        let mut failed = current.clone();
        failed.status = status;
        failed.status_reason = snapshot.status_reason.clone();
        self.apply_outputs(&mut failed, snapshot);
        self.sync_live_count(&mut failed, snapshot);

        if failed != current {
            if status != current.status {
                info!(from = %current.status, to = %status, "Stack status changed");
            }
            if let Err(outcome) = self.persist(failed).await {
                return outcome;
            }
        }
        error!(
            status = %status,
            reason = snapshot.status_reason.as_deref().unwrap_or(""),
            "Stack operation failed"
        );
        PollOutcome::Failed(status)
    }

    async fn record_progress(
        &self,
        mut resource: ManagedResource,
        status: ResourceStatus,
        snapshot: &StackSnapshot,
    ) -> Result<ManagedResource, PollOutcome> {
        info!(from = %resource.status, to = %status, "Stack status changed");
        resource.status = status;
        resource.status_reason = snapshot.status_reason.clone();
        self.sync_live_count(&mut resource, snapshot);
        self.persist(resource).await
    }

    fn apply_outputs(&self, resource: &mut ManagedResource, snapshot: &StackSnapshot) {
        for (attr, value) in self.definition.map_outputs(&snapshot.outputs) {
            if let Err(err) = resource.attributes.set(attr, value) {
                warn!(attr, error = %err, "Ignoring unusable stack output");
            }
        }
    }

    fn sync_live_count(&self, resource: &mut ManagedResource, snapshot: &StackSnapshot) {
        let Some(count) = self.definition.live_count(&snapshot.parameters) else {
            return;
        };
        let attr = self.definition.live_count_attr();
        if let Err(err) = resource.attributes.set(attr, serde_json::Value::from(count)) {
            warn!(attr, error = %err, "Failed to sync live count");
        }
    }

    /// Conditional write under the loop's generation.
    async fn persist(&self, mut resource: ManagedResource) -> Result<ManagedResource, PollOutcome> {
        resource.updated_at = Utc::now();
        match self.deps.store.save(&resource, self.generation).await {
            Ok(WriteOutcome::Applied) => Ok(resource),
            Ok(WriteOutcome::Superseded { current }) => {
                debug!(current = %current, "Write superseded by a newer operation");
                Err(PollOutcome::Superseded)
            }
            Ok(WriteOutcome::Missing) => {
                debug!("Record vanished before write");
                Err(PollOutcome::Superseded)
            }
            Err(err) => {
                error!(error = %err, "Failed to persist status");
                Err(PollOutcome::Aborted(err.to_string()))
            }
        }
    }

    fn check_budget(&self) -> Tick {
        let id = self.resource_id.to_string();
        let err = self.budget.check(&id).err()?;

        if self.operation == Operation::Create && self.remote_timeout.is_none() {
            error!(
                attempts = self.budget.attempts(),
                error = %err,
                "Create without timeout did not finish within the attempt budget"
            );
        } else {
            error!(
                attempts = self.budget.attempts(),
                timeout_mins = self.remote_timeout,
                error = %err,
                "Stack still in progress after the attempt ceiling"
            );
        }
        Some(PollOutcome::Exhausted {
            attempts: self.budget.attempts(),
        })
    }
}
