//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Crate root and error type of the transport-to-stream bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! The bridge proper: wait for a stream schema, then move every transport
//! record into the stream until the operator interrupts.

pub mod context;
pub mod pipeline;
pub mod resolver;
pub mod transform;

/// Shared result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error enumeration for the bridge. Per-message failures never surface
/// here; they are counted in [`BridgeStats`] instead.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wrapper for store failures that are not per-message.
    #[error(transparent)]
    Store(#[from] foam_store::StoreError),
    /// Wrapper for startup supervision failures.
    #[error(transparent)]
    Supervisor(#[from] foam_supervisor::SupervisorError),
    /// The transport consumer is no longer usable.
    #[error("transport failure: {0}")]
    Transport(#[from] foam_transport::TransportError),
    /// The operator interrupted a wait.
    #[error("interrupted by the operator")]
    Interrupted,
}

pub use context::FoamContext;
pub use pipeline::{BridgePipeline, BridgeState, BridgeStats};
pub use resolver::SchemaResolver;
pub use transform::{conform, to_ndarray, TransformError};
