//! Operation Handler, reconciliation loops and the registry that keeps at
//! most one loop per resource.

mod handler;
mod poller;
mod registry;

pub use handler::{resolve_create_timeout, stack_name, Conductor, ConductorSettings};
pub use poller::{PollOutcome, PollerDeps, StackPoller};
pub use registry::{ActivePoller, ClaimTicket, Operation, PollerRegistry};
