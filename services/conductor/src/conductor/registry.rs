//! Registry of in-flight operations, one slot per resource.
//!
//! A slot is held from the moment an operation is claimed until its
//! reconciliation loop finishes. Create and update are refused while the slot
//! is held; delete takes the slot over and leaves any running loop to notice
//! on its next tick that its generation is gone. A finished loop drops its
//! own slot and leaves its outcome in a short history for `wait`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use oasis_id::ResourceId;
use oasis_reconcile::Generation;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::poller::PollOutcome;
use crate::error::{ConductorError, ConductorResult};

/// Finished outcomes kept after their slot is dropped.
const OUTCOME_HISTORY: usize = 256;

/// Operation kinds submitted through the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a spawned reconciliation loop.
#[derive(Debug)]
pub struct ActivePoller {
    pub operation: Operation,
    pub generation: Generation,
    pub(crate) stop: watch::Sender<bool>,
    pub(crate) outcome: watch::Receiver<Option<PollOutcome>>,
    pub(crate) handle: JoinHandle<()>,
}

impl ActivePoller {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn signal_stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Proof of a claimed slot; only the current holder may attach or release.
#[derive(Debug)]
#[must_use = "a claim must be attached to a poller or released"]
pub struct ClaimTicket {
    resource_id: ResourceId,
    operation: Operation,
    token: u64,
}

#[derive(Debug)]
enum Slot {
    Submitting { token: u64, operation: Operation },
    Polling { token: u64, poller: ActivePoller },
}

impl Slot {
    fn token(&self) -> u64 {
        match self {
            Self::Submitting { token, .. } | Self::Polling { token, .. } => *token,
        }
    }

    fn is_busy(&self) -> bool {
        match self {
            Self::Submitting { .. } => true,
            Self::Polling { poller, .. } => poller.is_running(),
        }
    }
}

#[derive(Debug)]
struct Retired {
    resource_id: ResourceId,
    token: u64,
    poller: ActivePoller,
}

#[derive(Debug)]
struct Finished {
    resource_id: ResourceId,
    token: u64,
    outcome: PollOutcome,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_token: u64,
    slots: HashMap<ResourceId, Slot>,
    /// Loops taken over by a delete, kept so shutdown can still join them.
    retired: Vec<Retired>,
    finished: VecDeque<Finished>,
    closed: bool,
}

impl RegistryState {
    /// Drop whatever the loop behind `token` still holds and remember how it ended.
    fn forget(&mut self, resource_id: &ResourceId, token: u64, outcome: Option<PollOutcome>) {
        let owned = matches!(
            self.slots.get(resource_id),
            Some(Slot::Polling { token: held, .. }) if *held == token
        );
        if owned {
            self.slots.remove(resource_id);
        }
        self.retired.retain(|entry| entry.token != token);

        if let Some(outcome) = outcome {
            if self.finished.len() == OUTCOME_HISTORY {
                self.finished.pop_front();
            }
            self.finished.push_back(Finished {
                resource_id: resource_id.clone(),
                token,
                outcome,
            });
        }
    }

    fn latest_finished(&self, resource_id: &ResourceId) -> Option<&Finished> {
        self.finished
            .iter()
            .filter(|entry| &entry.resource_id == resource_id)
            .max_by_key(|entry| entry.token)
    }

    fn latest_retired(&self, resource_id: &ResourceId) -> Option<&Retired> {
        self.retired
            .iter()
            .filter(|entry| &entry.resource_id == resource_id)
            .max_by_key(|entry| entry.token)
    }
}

enum Waiter {
    Ready(PollOutcome),
    Pending(watch::Receiver<Option<PollOutcome>>),
}

#[derive(Debug, Default)]
pub struct PollerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        lock(&self.state)
    }

    /// Clear the loop's slot once it reports, whether or not it still owns it.
    fn watch_completion(
        &self,
        resource_id: ResourceId,
        token: u64,
        mut outcome: watch::Receiver<Option<PollOutcome>>,
    ) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let reported = match outcome.wait_for(Option::is_some).await {
                Ok(value) => (*value).clone(),
                Err(_) => None,
            };
            lock(&state).forget(&resource_id, token, reported);
        });
    }

    /// Claim the resource's slot for `operation`.
    pub fn claim(&self, resource_id: &ResourceId, operation: Operation) -> ConductorResult<ClaimTicket> {
        let mut state = self.state();
        if state.closed {
            return Err(ConductorError::Conflict("conductor is shutting down".to_string()));
        }
        state.retired.retain(|entry| entry.poller.is_running());

        if let Some(slot) = state.slots.get(resource_id) {
            if slot.is_busy() && operation != Operation::Delete {
                return Err(ConductorError::OperationInProgress(resource_id.clone()));
            }
        }

        state.next_token += 1;
        let token = state.next_token;
        let previous = state
            .slots
            .insert(resource_id.clone(), Slot::Submitting { token, operation });

        match previous {
            Some(Slot::Polling {
                token: preempted,
                poller,
            }) if poller.is_running() => {
                info!(
                    resource_id = %resource_id,
                    preempted = %poller.operation,
                    "Delete preempts running loop"
                );
                state.retired.push(Retired {
                    resource_id: resource_id.clone(),
                    token: preempted,
                    poller,
                });
            }
            Some(Slot::Submitting {
                operation: pending, ..
            }) => {
                debug!(
                    resource_id = %resource_id,
                    pending = %pending,
                    "Delete takes over a pending submission"
                );
            }
            _ => {}
        }

        Ok(ClaimTicket {
            resource_id: resource_id.clone(),
            operation,
            token,
        })
    }

    /// Hand the slot over to a spawned loop.
    ///
    /// If the claim was taken over in the meantime the loop is told to stop.
    pub fn attach(&self, ticket: ClaimTicket, poller: ActivePoller) {
        let outcome = poller.outcome.clone();
        let mut state = self.state();
        let current = state.slots.get(&ticket.resource_id).map(Slot::token);
        if current != Some(ticket.token) || state.closed {
            debug!(
                resource_id = %ticket.resource_id,
                operation = %ticket.operation,
                "Claim lost before attach, stopping loop"
            );
            poller.signal_stop();
            state.retired.push(Retired {
                resource_id: ticket.resource_id.clone(),
                token: ticket.token,
                poller,
            });
        } else {
            state.slots.insert(
                ticket.resource_id.clone(),
                Slot::Polling {
                    token: ticket.token,
                    poller,
                },
            );
        }
        self.watch_completion(ticket.resource_id, ticket.token, outcome);
    }

    /// Give the slot back without starting a loop.
    pub fn release(&self, ticket: ClaimTicket) {
        let mut state = self.state();
        if state.slots.get(&ticket.resource_id).map(Slot::token) == Some(ticket.token) {
            state.slots.remove(&ticket.resource_id);
        }
    }

    /// True while a loop for the resource is still polling.
    pub fn is_active(&self, resource_id: &ResourceId) -> bool {
        matches!(
            self.state().slots.get(resource_id),
            Some(Slot::Polling { poller, .. }) if poller.is_running()
        )
    }

    pub fn active_count(&self) -> usize {
        let state = self.state();
        state
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Polling { poller, .. } if poller.is_running()))
            .count()
            + state.retired.iter().filter(|entry| entry.poller.is_running()).count()
    }

    /// Slots and retired loops currently held, finished or not.
    pub fn tracked(&self) -> usize {
        let state = self.state();
        state.slots.len() + state.retired.len()
    }

    /// Wait for the resource's latest loop to finish and return its outcome.
    ///
    /// Falls back to a loop preempted by a delete when the delete itself did
    /// not start one, and to the recorded outcome once a loop has dropped its
    /// slot. Returns `None` when there is no loop or it died without reporting.
    pub async fn wait(&self, resource_id: &ResourceId) -> Option<PollOutcome> {
        let mut outcome = match self.waiter(resource_id)? {
            Waiter::Ready(outcome) => return Some(outcome),
            Waiter::Pending(outcome) => outcome,
        };
        let result = outcome.wait_for(Option::is_some).await.ok()?.clone();
        result
    }

    fn waiter(&self, resource_id: &ResourceId) -> Option<Waiter> {
        let state = self.state();
        if let Some(Slot::Polling { poller, .. }) = state.slots.get(resource_id) {
            return Some(Waiter::Pending(poller.outcome.clone()));
        }
        match (state.latest_retired(resource_id), state.latest_finished(resource_id)) {
            (Some(retired), Some(finished)) if finished.token > retired.token => {
                Some(Waiter::Ready(finished.outcome.clone()))
            }
            (Some(retired), _) => Some(Waiter::Pending(retired.poller.outcome.clone())),
            (None, Some(finished)) => Some(Waiter::Ready(finished.outcome.clone())),
            (None, None) => None,
        }
    }

    /// Signal every loop to stop and wait up to `timeout` for them to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        let pollers: Vec<ActivePoller> = {
            let mut state = self.state();
            state.closed = true;
            let mut pollers: Vec<ActivePoller> = state
                .slots
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Polling { poller, .. } => Some(poller),
                    Slot::Submitting { .. } => None,
                })
                .collect();
            pollers.extend(state.retired.drain(..).map(|entry| entry.poller));
            pollers
        };

        let running = pollers.iter().filter(|p| p.is_running()).count();
        info!(loops = running, "Stopping reconciliation loops");
        for poller in &pollers {
            poller.signal_stop();
        }

        let join_all = async {
            for poller in pollers {
                let _ = poller.handle.await;
            }
        };
        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!("Timed out waiting for reconciliation loops to stop");
        }
    }
}
