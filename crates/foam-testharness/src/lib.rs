//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Crate root of the shared test doubles."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Test doubles for the bridge: an in-memory store speaking the Redis
//! client interface, a scripted message source and a scripted launcher.
#![warn(missing_docs)]

use std::sync::Arc;

use foam_store::ConnectionParams;

pub mod memory_store;
pub mod scripted;

/// Parameters pointing at the default local store; the in-memory store
/// ignores them but the registry validates them.
pub fn local_params() -> ConnectionParams {
    ConnectionParams::new("localhost", 6379)
}

/// Registry whose sessions are served by `store`.
pub fn memory_registry(store: &MemoryStore) -> Arc<foam_store::ConnectionRegistry> {
    foam_store::ConnectionRegistry::new(Arc::new(store.clone()))
}

pub use memory_store::{Failure, MemorySession, MemoryStore, DEFAULT_OUTPUT_BUFFER_LIMIT};
pub use scripted::{record, LaunchBehavior, ScriptedConsumer, ScriptedLauncher, Step};
