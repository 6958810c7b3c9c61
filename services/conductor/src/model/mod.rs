//! Data model shared by the store, the operation handler and the loop.

mod policy;
mod resource;
mod status;

pub use policy::NodePoolPolicy;
pub use resource::{
    AttributeChanges, AttributeError, Attributes, FunctionAttributes, FunctionChanges,
    ManagedResource, NodePoolAttributes, NodePoolChanges, Owner, ResourceSpec, StackId,
    TrustCredentials,
};
pub use status::{ResourceStatus, StackAction, StackPhase, UnknownStatus};
