//! # oasis-id
//!
//! Typed identifiers for resources managed by the oasis conductor.
//!
//! ## ID Format
//!
//! Every identifier uses a prefixed format: `{prefix}_{ulid}`
//!
//! - `fn_01HV4Z2WQXKJNM8GPQY6VBKC3D` (function)
//! - `np_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (node pool)
//! - `npp_01HV4Z4NYPLTRS0JTUA8XDME5F` (node pool policy)
//!
//! The prefix makes an id self-describing, so a bare string can be routed to
//! the right resource kind without a lookup. Orchestrator stack handles are
//! not minted here; they are opaque strings owned by the orchestrator.

mod error;
mod macros;
mod types;

pub use error::IdError;
#[doc(hidden)]
pub use macros::split_prefixed;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
