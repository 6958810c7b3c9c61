//! oasis conductor library.
//!
//! Drives functions and node pools through their stack lifecycle: operations
//! are submitted to the orchestrator and then reconciled by polling until they
//! settle. The `conductor` binary wires this library to Heat, Keystone and
//! Postgres; the library surface exists for integration testing.

pub mod api;
pub mod conductor;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod model;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod template;
