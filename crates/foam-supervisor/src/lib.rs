//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Crate root and error type of the store supervisor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Lifecycle of the Redis server behind the bridge: find a running
//! instance, negotiate its shutdown, launch a fresh one and apply the
//! memory and pub/sub buffer policy before anything else touches it.

use std::path::PathBuf;

pub mod capacity;
pub mod host;
pub mod process;
pub mod prompt;
pub mod reaper;
pub mod supervisor;

/// Shared result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error enumeration for the supervisor. Every variant is fatal for startup.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The server executable does not exist.
    #[error("unable to find the Redis executable file: {0}")]
    Executable(PathBuf),
    /// The launched server never answered within the attempt budget.
    #[error("unable to start a Redis server at {addr} after {attempts} attempts; please check whether the port is already taken up")]
    Unreachable {
        /// `host:port` of the server.
        addr: String,
        /// Probe attempts made.
        attempts: u32,
    },
    /// The launched process is gone although something answered the probe.
    #[error("Redis server process for {addr} exited early (status {status:?}); please check whether the port is already taken up")]
    ExitedEarly {
        /// `host:port` of the server.
        addr: String,
        /// Exit code, if the process reported one.
        status: Option<i32>,
    },
    /// Memory or buffer limits could not be applied.
    #[error("failed to configure the Redis server: {0}")]
    Configuration(String),
    /// The operator interrupted a wait.
    #[error("interrupted by the operator")]
    Interrupted,
    /// Wrapper for store-layer failures.
    #[error(transparent)]
    Store(#[from] foam_store::StoreError),
    /// Wrapper for IO errors while spawning or prompting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub use capacity::{
    effective_memory_fraction, max_memory_bytes, rewrite_output_buffer_limit, BufferLimits,
    FALLBACK_MEMORY_FRACTION,
};
pub use host::{operator_identity, HostResources};
pub use process::{
    ChildProcess, LaunchSpec, Launcher, ProcessState, ProcessTable, ServerProcess,
    StoreProcessRecord, SystemLauncher,
};
pub use prompt::{Confirm, FixedAnswer, StdinConfirm};
pub use reaper::{kill_lingering, ProcessInfo, ReapReport, ReapTargets};
pub use supervisor::{Existing, StartOutcome, StoreSupervisor, SupervisorState};
